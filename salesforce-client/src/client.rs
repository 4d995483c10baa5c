use crate::api_error::{ApiError, ApiErrors};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, ExtraTokenFields,
    RefreshToken, RequestTokenError, ResourceOwnerPassword, ResourceOwnerUsername,
    StandardRevocableToken, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Default OAuth2 token endpoint path.
const DEFAULT_TOKEN_PATH: &str = "/services/oauth2/token";

/// Login URL for production orgs.
pub const PRODUCTION_LOGIN_URL: &str = "https://login.salesforce.com";

/// Login URL for sandbox orgs.
pub const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";

/// Salesforce specific fields returned next to the access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesforceTokenFields {
    /// Instance the token is bound to, e.g. `https://na1.salesforce.com`.
    #[serde(default)]
    pub instance_url: String,
    /// Identity URL of the authenticated user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Issuance time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<String>,
    /// Base64 HMAC-SHA256 signature over `id` and `issued_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ExtraTokenFields for SalesforceTokenFields {}

/// Type alias for the Salesforce OAuth2 token response.
pub type SalesforceTokenResponse =
    oauth2::StandardTokenResponse<SalesforceTokenFields, BasicTokenType>;

type OAuthClient<TokenEndpoint = EndpointSet> = oauth2::Client<
    BasicErrorResponse,
    SalesforceTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    TokenEndpoint,
>;

/// Errors that can occur during client operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to read credentials file from disk.
    #[error("Failed to read credentials file at {path}: {source}")]
    ReadCredentials {
        /// Path to the credentials file that failed to read.
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse credentials JSON.
    #[error("Failed to parse credentials JSON: {source}")]
    ParseCredentials {
        #[source]
        source: serde_json::Error,
    },
    /// Invalid URL format in credentials.
    #[error("Invalid URL format: {source}")]
    ParseUrl {
        #[source]
        source: url::ParseError,
    },
    /// Failed to build the underlying HTTP client.
    #[error("Failed to build HTTP client: {source}")]
    HttpClientBuild {
        #[source]
        source: reqwest::Error,
    },
    /// The token request could not be sent or its response could not be read.
    #[error("OAuth2 token exchange failed: {0}")]
    TokenExchange(Box<dyn std::error::Error + Send + Sync>),
    /// The login endpoint rejected the grant.
    #[error("Authentication rejected: {0}")]
    Auth(ApiError),
    /// Required builder parameter was not provided.
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
    /// Invalid credentials for the selected auth flow.
    #[error("Invalid credentials for {flow}: {message}")]
    InvalidCredentials {
        /// The authentication flow that failed validation.
        flow: String,
        /// Description of what's missing or invalid.
        message: String,
    },
    /// The session has no access token or no instance URL.
    #[error("Invalid session: access token and instance URL are required")]
    InvalidSession,
    /// Token refresh is not available (no refresh token present).
    #[error("Token refresh not available: no refresh token")]
    NoRefreshToken,
    /// Failed to acquire lock on session state.
    #[error("Failed to acquire lock on session state")]
    LockError,
}

/// OAuth2 grant used by [`Client::connect`] and [`Client::reauthenticate`].
///
/// # Flow Descriptions
///
/// ## Password
///
/// The Resource Owner Password Credentials flow. The security token, when
/// present, is appended to the password before it is sent.
///
/// **Required credentials:** `client_id`, `client_secret`, `username`, `password`
///
/// ## Refresh Token
///
/// Exchanges a previously issued refresh token for a new access token.
///
/// **Required credentials:** `client_id`, `client_secret`, `refresh_token`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    /// `grant_type=password`.
    #[default]
    Password,
    /// `grant_type=refresh_token`.
    RefreshToken,
}

/// Org environment, used to pick a login URL when none is configured.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Production or developer edition org.
    #[default]
    Production,
    /// Sandbox org.
    Sandbox,
}

impl Environment {
    /// Default login URL for this environment.
    pub fn login_url(&self) -> &'static str {
        match self {
            Environment::Production => PRODUCTION_LOGIN_URL,
            Environment::Sandbox => SANDBOX_LOGIN_URL,
        }
    }
}

/// Salesforce OAuth2 credentials.
///
/// Obtained from a Salesforce Connected App. Different fields are required
/// depending on the [`AuthFlow`] used.
///
/// # Examples
///
/// ```
/// use salesforce_client::client::{Credentials, Environment};
///
/// let creds = Credentials {
///     client_id: "your_client_id".to_string(),
///     client_secret: Some("your_client_secret".to_string()),
///     username: Some("user@example.com".to_string()),
///     password: Some("your_password".to_string()),
///     security_token: Some("your_security_token".to_string()),
///     refresh_token: None,
///     login_uri: None,
///     environment: Environment::Sandbox,
/// };
/// assert_eq!(creds.login_uri(), "https://test.salesforce.com");
/// ```
#[derive(Serialize, Deserialize, Clone)]
pub struct Credentials {
    /// Client ID from the Connected App (Consumer Key).
    pub client_id: String,
    /// Client Secret from the Connected App (Consumer Secret).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Username for authentication (email address).
    ///
    /// Required for: [`AuthFlow::Password`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for authentication.
    ///
    /// Required for: [`AuthFlow::Password`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Security token appended to the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_token: Option<String>,
    /// Refresh token issued by an earlier grant.
    ///
    /// Required for: [`AuthFlow::RefreshToken`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Login URL. Falls back to the [`Environment`] default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_uri: Option<String>,
    /// Org environment.
    #[serde(default)]
    pub environment: Environment,
}

impl Credentials {
    /// Login URL the token endpoint is resolved against.
    pub fn login_uri(&self) -> &str {
        self.login_uri
            .as_deref()
            .unwrap_or_else(|| self.environment.login_url())
    }

    fn token_url(&self) -> Result<TokenUrl, Error> {
        TokenUrl::new(format!(
            "{}{}",
            self.login_uri().trim_end_matches('/'),
            DEFAULT_TOKEN_PATH
        ))
        .map_err(|source| Error::ParseUrl { source })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() {
                "[REDACTED]"
            } else {
                "None"
            }
        }

        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("security_token", &redact(&self.security_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("login_uri", &self.login_uri())
            .field("environment", &self.environment)
            .finish()
    }
}

/// Source for loading credentials.
#[derive(Debug, Clone)]
pub enum CredentialsFrom {
    /// Load credentials from a JSON file.
    Path(PathBuf),
    /// Use credentials provided directly.
    Value(Credentials),
}

impl CredentialsFrom {
    fn load(self) -> Result<Credentials, Error> {
        match self {
            CredentialsFrom::Value(creds) => Ok(creds),
            CredentialsFrom::Path(path) => {
                let credentials_string =
                    fs::read_to_string(&path).map_err(|e| Error::ReadCredentials {
                        path: path.clone(),
                        source: e,
                    })?;
                serde_json::from_str(&credentials_string)
                    .map_err(|e| Error::ParseCredentials { source: e })
            }
        }
    }
}

/// Authenticated session issued by the login endpoint.
///
/// A session is usable only when both the access token and the instance URL
/// are set. Every grant replaces the whole snapshot at once.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Bearer token presented on every call.
    pub access_token: String,
    /// Base URL for REST and streaming calls.
    pub instance_url: String,
    /// Identity URL.
    pub id: Option<String>,
    /// Issuance time in milliseconds since the epoch.
    pub issued_at: Option<String>,
    /// Signature over `id` and `issued_at`.
    pub signature: Option<String>,
}

impl Session {
    /// Returns true when the session can authenticate a request.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.instance_url.is_empty()
    }

    fn from_token_response(response: &SalesforceTokenResponse) -> Self {
        let fields = response.extra_fields();
        Self {
            access_token: response.access_token().secret().clone(),
            instance_url: fields.instance_url.trim_end_matches('/').to_string(),
            id: fields.id.clone(),
            issued_at: fields.issued_at.clone(),
            signature: fields.signature.clone(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("instance_url", &self.instance_url)
            .field("id", &self.id)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

enum Grant {
    Password { username: String, password: String },
    RefreshToken(String),
}

impl Grant {
    fn name(&self) -> &'static str {
        match self {
            Grant::Password { .. } => "password",
            Grant::RefreshToken(_) => "refresh_token",
        }
    }
}

/// Salesforce API client.
///
/// Holds the credentials, the shared session and the HTTP transports. Cloning
/// is cheap and every clone observes the same session, so a reauthentication
/// performed through one clone is visible to all of them.
///
/// Use [`Builder`] to construct a client instance.
///
/// # Examples
///
/// ```no_run
/// use salesforce_client::client::{self, AuthFlow, Credentials, Environment};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = client::Builder::new()
///     .credentials(Credentials {
///         client_id: "your_client_id".to_string(),
///         client_secret: Some("your_client_secret".to_string()),
///         username: Some("user@example.com".to_string()),
///         password: Some("your_password".to_string()),
///         security_token: Some("your_security_token".to_string()),
///         refresh_token: None,
///         login_uri: None,
///         environment: Environment::Production,
///     })
///     .auth_flow(AuthFlow::Password)
///     .build()?
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    credentials: Arc<Credentials>,
    auth_flow: AuthFlow,
    /// Current session snapshot, replaced wholesale by each grant.
    pub(crate) session: Arc<RwLock<Session>>,
    /// Refresh token, seeded from the credentials and rotated by grants.
    refresh_token: Arc<RwLock<Option<String>>>,
    /// Transport for REST calls.
    pub(crate) http_client: reqwest::Client,
    /// Transport for token requests. Never follows redirects.
    auth_http_client: reqwest::Client,
    pub(crate) api_version: String,
    pub(crate) user_agent: String,
    pub(crate) connect_timeout: Duration,
    /// Set while a streaming session is running on this client.
    pub(crate) streaming_active: Arc<AtomicBool>,
}

impl Client {
    /// Validates that required credential fields are present for the selected auth flow.
    fn validate_credentials(&self) -> Result<(), Error> {
        let flow_name = format!("{:?}", self.auth_flow);
        let credentials = &self.credentials;

        let missing = |message: &str| Error::InvalidCredentials {
            flow: flow_name.clone(),
            message: message.to_string(),
        };

        if credentials.client_secret.is_none() {
            return Err(missing("client_secret is required"));
        }

        match self.auth_flow {
            AuthFlow::Password => {
                if credentials.username.is_none() {
                    return Err(missing("username is required"));
                }
                if credentials.password.is_none() {
                    return Err(missing("password is required"));
                }
            }
            AuthFlow::RefreshToken => {
                let has_refresh_token = self
                    .refresh_token
                    .read()
                    .map_err(|_| Error::LockError)?
                    .is_some();
                if !has_refresh_token {
                    return Err(missing("refresh_token is required"));
                }
            }
        }

        Ok(())
    }

    /// Connects to Salesforce and exchanges credentials for an access token.
    ///
    /// Performs the configured [`AuthFlow`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required fields are missing for the auth flow ([`Error::InvalidCredentials`])
    /// - Login URL is malformed ([`Error::ParseUrl`])
    /// - The grant is rejected ([`Error::Auth`])
    /// - The token request fails ([`Error::TokenExchange`])
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn connect(self) -> Result<Self, Error> {
        self.validate_credentials()?;
        self.reauthenticate().await?;
        Ok(self)
    }

    /// Performs the password grant.
    ///
    /// Sends the username and the password concatenated with the security
    /// token. On success the session is replaced; on failure it is left as is.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn authenticate(&self) -> Result<(), Error> {
        let credentials = &self.credentials;
        let missing = |message: &str| Error::InvalidCredentials {
            flow: "Password".to_string(),
            message: message.to_string(),
        };

        let username = credentials
            .username
            .clone()
            .ok_or_else(|| missing("username is required"))?;
        let password = credentials
            .password
            .as_deref()
            .ok_or_else(|| missing("password is required"))?;
        let password = format!(
            "{}{}",
            password,
            credentials.security_token.as_deref().unwrap_or_default()
        );

        self.authenticate_with_grant(Grant::Password { username, password })
            .await
    }

    /// Performs the refresh token grant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRefreshToken`] when no refresh token is known.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn authenticate_with_refresh_token(&self) -> Result<(), Error> {
        let refresh_token = self
            .refresh_token
            .read()
            .map_err(|_| Error::LockError)?
            .clone()
            .ok_or(Error::NoRefreshToken)?;

        self.authenticate_with_grant(Grant::RefreshToken(refresh_token))
            .await
    }

    /// Forces a new session using the configured [`AuthFlow`].
    ///
    /// Called by the request pipeline when Salesforce reports
    /// `INVALID_SESSION_ID`.
    pub async fn reauthenticate(&self) -> Result<(), Error> {
        match self.auth_flow {
            AuthFlow::Password => self.authenticate().await,
            AuthFlow::RefreshToken => self.authenticate_with_refresh_token().await,
        }
    }

    /// Shared path for every grant: posts the form, classifies the response
    /// and swaps in the new session.
    async fn authenticate_with_grant(&self, grant: Grant) -> Result<(), Error> {
        let oauth_client = self.oauth_client()?;
        let grant_type = grant.name();

        let result = match &grant {
            Grant::Password { username, password } => {
                oauth_client
                    .exchange_password(
                        &ResourceOwnerUsername::new(username.clone()),
                        &ResourceOwnerPassword::new(password.clone()),
                    )
                    .request_async(&self.auth_http_client)
                    .await
            }
            Grant::RefreshToken(token) => {
                oauth_client
                    .exchange_refresh_token(&RefreshToken::new(token.clone()))
                    .request_async(&self.auth_http_client)
                    .await
            }
        };

        let token_response = result.map_err(|err| {
            let err = token_error(err);
            tracing::error!(grant_type, error = %err, "authentication failed");
            err
        })?;

        let session = Session::from_token_response(&token_response);
        if let Some(refresh_token) = token_response.refresh_token() {
            *self.refresh_token.write().map_err(|_| Error::LockError)? =
                Some(refresh_token.secret().clone());
        }
        *self.session.write().map_err(|_| Error::LockError)? = session;

        tracing::debug!(grant_type, "session established");
        Ok(())
    }

    fn oauth_client(&self) -> Result<OAuthClient, Error> {
        let client_secret =
            self.credentials
                .client_secret
                .as_ref()
                .ok_or_else(|| Error::InvalidCredentials {
                    flow: format!("{:?}", self.auth_flow),
                    message: "client_secret is required".to_string(),
                })?;

        Ok(
            OAuthClient::<EndpointNotSet>::new(ClientId::new(self.credentials.client_id.clone()))
                .set_client_secret(ClientSecret::new(client_secret.clone()))
                .set_auth_type(AuthType::RequestBody)
                .set_token_uri(self.credentials.token_url()?),
        )
    }

    /// Checks that the session can authenticate a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`] when the access token or the
    /// instance URL is empty.
    pub fn validate(&self) -> Result<(), Error> {
        if self.session()?.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidSession)
        }
    }

    /// Returns true if the error list reports an expired session.
    pub fn expired(&self, errors: &ApiErrors) -> bool {
        errors.is_session_expired()
    }

    /// Returns a snapshot of the current session.
    pub fn session(&self) -> Result<Session, Error> {
        Ok(self.session.read().map_err(|_| Error::LockError)?.clone())
    }

    /// Returns the current access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`] if the client is not connected.
    pub fn current_access_token(&self) -> Result<String, Error> {
        let session = self.session()?;
        if !session.is_valid() {
            return Err(Error::InvalidSession);
        }
        Ok(session.access_token)
    }

    /// Returns the configured auth flow.
    pub fn auth_flow(&self) -> AuthFlow {
        self.auth_flow
    }

    /// Returns the credentials this client authenticates with.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns the REST API version, e.g. `"65.0"`.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Builds a path under the versioned REST root.
    ///
    /// `client.data_path("/sobjects")` yields `/services/data/v65.0/sobjects`.
    pub fn data_path(&self, suffix: &str) -> String {
        format!("/services/data/v{}{}", self.api_version, suffix)
    }
}

fn token_error(
    err: RequestTokenError<
        oauth2::HttpClientError<reqwest::Error>,
        BasicErrorResponse,
    >,
) -> Error {
    match err {
        RequestTokenError::ServerResponse(response) => Error::Auth(ApiError {
            error_name: Some(response.error().to_string()),
            error_description: response.error_description().cloned(),
            ..Default::default()
        }),
        RequestTokenError::Parse(source, body) => {
            match serde_json::from_slice::<ApiError>(&body) {
                Ok(api_error) if api_error.is_populated() => Error::Auth(api_error),
                _ => Error::TokenExchange(Box::new(source)),
            }
        }
        other => Error::TokenExchange(Box::new(other)),
    }
}

/// Builder for constructing a [`Client`].
///
/// Credentials are resolved when [`build`](Self::build) runs, so a bad file
/// path or malformed JSON is reported before any network call.
///
/// # Examples
///
/// ```no_run
/// use salesforce_client::client;
/// use std::path::PathBuf;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = client::Builder::new()
///     .credentials_path(PathBuf::from("credentials.json"))
///     .api_version("62.0")
///     .build()?
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Builder {
    credentials_from: Option<CredentialsFrom>,
    auth_flow: Option<AuthFlow>,
    api_version: Option<String>,
    user_agent: Option<String>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets credentials to load from a JSON file.
    ///
    /// ```json
    /// {
    ///   "client_id": "your_client_id",
    ///   "client_secret": "your_client_secret",
    ///   "username": "user@example.com",
    ///   "password": "your_password",
    ///   "security_token": "your_security_token",
    ///   "environment": "sandbox"
    /// }
    /// ```
    pub fn credentials_path(mut self, path: PathBuf) -> Self {
        self.credentials_from = Some(CredentialsFrom::Path(path));
        self
    }

    /// Sets credentials directly.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials_from = Some(CredentialsFrom::Value(credentials));
        self
    }

    /// Sets the OAuth2 grant. Defaults to [`AuthFlow::Password`].
    pub fn auth_flow(mut self, auth_flow: AuthFlow) -> Self {
        self.auth_flow = Some(auth_flow);
        self
    }

    /// Sets the REST API version. Defaults to [`crate::DEFAULT_API_VERSION`].
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Overrides the `User-Agent` sent on every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the TCP connect timeout for REST and streaming calls.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the overall timeout for REST calls.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials were not provided, cannot be read or
    /// parsed, or if an HTTP transport cannot be created.
    pub fn build(self) -> Result<Client, Error> {
        let credentials = self
            .credentials_from
            .ok_or_else(|| {
                Error::MissingRequiredAttribute("credentials or credentials_path".to_string())
            })?
            .load()?;

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| crate::DEFAULT_USER_AGENT.to_string());
        let connect_timeout = self
            .connect_timeout
            .unwrap_or(Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS));
        let request_timeout = self
            .request_timeout
            .unwrap_or(Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS));

        let http_client = reqwest::Client::builder()
            .user_agent(user_agent.as_str())
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .tcp_keepalive(Duration::from_secs(crate::DEFAULT_TCP_KEEPALIVE_SECS))
            .pool_max_idle_per_host(crate::DEFAULT_POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(crate::DEFAULT_POOL_IDLE_TIMEOUT_SECS))
            .build()
            .map_err(|source| Error::HttpClientBuild { source })?;

        let auth_http_client = reqwest::Client::builder()
            .user_agent(user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(crate::DEFAULT_AUTH_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(crate::DEFAULT_AUTH_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|source| Error::HttpClientBuild { source })?;

        let refresh_token = credentials.refresh_token.clone();

        Ok(Client {
            credentials: Arc::new(credentials),
            auth_flow: self.auth_flow.unwrap_or_default(),
            session: Arc::new(RwLock::new(Session::default())),
            refresh_token: Arc::new(RwLock::new(refresh_token)),
            http_client,
            auth_http_client,
            api_version: self
                .api_version
                .unwrap_or_else(|| crate::DEFAULT_API_VERSION.to_string()),
            user_agent,
            connect_timeout,
            streaming_active: Arc::new(AtomicBool::new(false)),
        })
    }
}
