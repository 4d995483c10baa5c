//! Authenticated REST request pipeline.
//!
//! Every call goes through [`Client::execute`], which signs the request with
//! the current session, decodes the response and recovers once from an
//! `INVALID_SESSION_ID` report by reauthenticating and replaying the call.
//!
//! # Example
//!
//! ```no_run
//! use salesforce_client::client;
//! use serde::Deserialize;
//! use std::path::PathBuf;
//!
//! #[derive(Deserialize)]
//! struct Account {
//!     #[serde(rename = "Name")]
//!     name: String,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = client::Builder::new()
//!     .credentials_path(PathBuf::from("credentials.json"))
//!     .build()?
//!     .connect()
//!     .await?;
//!
//! let path = client.data_path("/sobjects/Account/001xx000003DGb2AAG");
//! let account: Option<Account> = client.get(&path, &[("fields", "Name")]).await?;
//! # Ok(())
//! # }
//! ```

use crate::api_error::ApiErrors;
use crate::client::{self, Client};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors returned by the request pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The session cannot authenticate a request; nothing was sent.
    #[error("Invalid session: {0}")]
    SessionInvalid(#[source] client::Error),
    /// The payload could not be serialized.
    #[error("Failed to encode payload for {method} {path}: {source}")]
    Encoding {
        method: Method,
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// Instance URL and path do not form a valid URL.
    #[error("Invalid request URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// The request could not be sent or no response was received.
    #[error("Request {method} {path} failed: {source}")]
    Network {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The response body could not be read.
    #[error("Failed to read response body for {method} {path}: {source}")]
    ReadBody {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// Salesforce answered with an error envelope.
    #[error("Salesforce API error on {method} {path}: {errors}")]
    Api {
        method: Method,
        path: String,
        errors: ApiErrors,
    },
    /// The response is neither the expected type nor an error envelope.
    #[error("Failed to decode response for {method} {path}: {source}")]
    Decode {
        method: Method,
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// The session expired and obtaining a new one failed.
    #[error("Reauthentication failed: {0}")]
    Auth(#[source] client::Error),
}

/// Outcome of a single round trip.
enum Attempt<T> {
    Done(Option<T>),
    SessionExpired(ApiErrors),
}

/// What a successful response body is read as.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// Decode into the caller's type.
    Typed,
    /// Ignore the body unless it is an error envelope.
    Nothing,
}

impl Client {
    /// Executes an authenticated request against the instance.
    ///
    /// `path` is appended to the session's instance URL; `params` are encoded
    /// into the query string. Returns `Ok(None)` for `204 No Content`.
    ///
    /// When the response is an error envelope reporting `INVALID_SESSION_ID`
    /// the client reauthenticates and replays the request once. A second
    /// expiry report is returned as [`Error::Api`].
    ///
    /// # Errors
    ///
    /// - [`Error::SessionInvalid`] if the client is not connected
    /// - [`Error::Encoding`] if `payload` cannot be serialized
    /// - [`Error::Network`] on transport failure, never retried
    /// - [`Error::Api`] if Salesforce reports an error
    /// - [`Error::Auth`] if reauthentication fails
    /// - [`Error::Decode`] if the body is neither `T` nor an error envelope
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(method = %method, path = %path)))]
    pub async fn execute<T, P>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        payload: Option<&P>,
    ) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.execute_as(method, path, params, payload, Expect::Typed)
            .await
    }

    async fn execute_as<T, P>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        payload: Option<&P>,
        expect: Expect,
    ) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.validate().map_err(|err| {
            tracing::error!(%method, path, error = %err, "error creating request");
            Error::SessionInvalid(err)
        })?;

        let body = payload
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|source| {
                tracing::error!(%method, path, error = %source, "error encoding payload");
                Error::Encoding {
                    method: method.clone(),
                    path: path.to_string(),
                    source,
                }
            })?;

        let mut reauthenticated = false;
        loop {
            match self
                .send_once::<T>(&method, path, params, body.as_deref(), expect)
                .await?
            {
                Attempt::Done(value) => return Ok(value),
                Attempt::SessionExpired(_) if !reauthenticated => {
                    tracing::info!(%method, path, "session expired, reauthenticating");
                    self.reauthenticate().await.map_err(Error::Auth)?;
                    reauthenticated = true;
                }
                Attempt::SessionExpired(errors) => {
                    tracing::warn!(%method, path, "session still expired after reauthentication");
                    return Err(Error::Api {
                        method,
                        path: path.to_string(),
                        errors,
                    });
                }
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&[u8]>,
        expect: Expect,
    ) -> Result<Attempt<T>, Error> {
        // One snapshot per attempt so the URL and the token always match.
        let session = self.session().map_err(Error::SessionInvalid)?;
        if !session.is_valid() {
            return Err(Error::SessionInvalid(client::Error::InvalidSession));
        }

        let url = request_url(&session.instance_url, path, params)?;
        let mut request = self
            .http_client
            .request(method.clone(), url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .bearer_auth(&session.access_token);
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        tracing::trace!(%method, path, "sending request");
        let response = request.send().await.map_err(|source| {
            tracing::error!(%method, path, error = %source, "error sending request");
            Error::Network {
                method: method.clone(),
                path: path.to_string(),
                source,
            }
        })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Attempt::Done(None));
        }

        let bytes = response.bytes().await.map_err(|source| Error::ReadBody {
            method: method.clone(),
            path: path.to_string(),
            source,
        })?;
        tracing::trace!(%method, path, %status, body = %String::from_utf8_lossy(&bytes), "response received");

        if expect == Expect::Nothing {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Attempt::Done(None));
            }
            return match ApiErrors::parse(&bytes) {
                Some(errors) => self.classify(method, path, errors),
                None => Ok(Attempt::Done(None)),
            };
        }

        let decode_error = match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => return Ok(Attempt::Done(Some(value))),
            Err(err) => err,
        };

        if let Some(errors) = ApiErrors::parse(&bytes) {
            return self.classify(method, path, errors);
        }

        tracing::error!(%method, path, %status, error = %decode_error, "error decoding response");
        Err(Error::Decode {
            method: method.clone(),
            path: path.to_string(),
            source: decode_error,
        })
    }

    /// Splits an error envelope into a retryable expiry or a terminal API error.
    fn classify<T>(&self, method: &Method, path: &str, errors: ApiErrors) -> Result<Attempt<T>, Error> {
        if self.expired(&errors) {
            return Ok(Attempt::SessionExpired(errors));
        }
        Err(Error::Api {
            method: method.clone(),
            path: path.to_string(),
            errors,
        })
    }

    /// Issues a `GET`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<T>, Error> {
        self.execute::<T, ()>(Method::GET, path, params, None).await
    }

    /// Issues a `POST` with a JSON payload.
    pub async fn post<T, P>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        payload: &P,
    ) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.execute(Method::POST, path, params, Some(payload)).await
    }

    /// Issues a `PUT` with a JSON payload.
    pub async fn put<T, P>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        payload: &P,
    ) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.execute(Method::PUT, path, params, Some(payload)).await
    }

    /// Issues a `PATCH` with a JSON payload.
    pub async fn patch<T, P>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        payload: &P,
    ) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.execute(Method::PATCH, path, params, Some(payload)).await
    }

    /// Issues a `DELETE`, discarding any response body that is not an error envelope.
    pub async fn delete(&self, path: &str, params: &[(&str, &str)]) -> Result<(), Error> {
        self.execute_as::<IgnoredAny, ()>(Method::DELETE, path, params, None, Expect::Nothing)
            .await
            .map(|_| ())
    }
}

fn request_url(instance_url: &str, path: &str, params: &[(&str, &str)]) -> Result<url::Url, Error> {
    let raw = format!("{instance_url}{path}");
    let mut url = url::Url::parse(&raw).map_err(|source| Error::InvalidUrl {
        url: raw.clone(),
        source,
    })?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{set_session, test_credentials, token_body};
    use crate::client::Builder;
    use mockito::{Matcher, Server, ServerGuard};
    use serde::Deserialize;
    use serde_json::json;

    const ACCOUNT_PATH: &str = "/services/data/v65.0/sobjects/Account/001xx000003DGb2AAG";
    const EXPIRED_BODY: &str =
        r#"[{"message":"Session expired or invalid","errorCode":"INVALID_SESSION_ID"}]"#;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Account {
        #[serde(rename = "Id")]
        id: String,
        #[serde(rename = "Name")]
        name: String,
    }

    fn connected_client(server: &ServerGuard, access_token: &str) -> Client {
        let client = Builder::new()
            .credentials(test_credentials(&server.url()))
            .build()
            .unwrap();
        set_session(&client, access_token, &server.url());
        client
    }

    async fn token_mock(server: &mut ServerGuard, access_token: &str) -> mockito::Mock {
        let url = server.url();
        server
            .mock("POST", "/services/oauth2/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_body(access_token, &url))
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_session_invalid_before_network() {
        let client = Builder::new()
            .credentials(test_credentials("http://127.0.0.1:1"))
            .build()
            .unwrap();
        let result = client.get::<Account>(ACCOUNT_PATH, &[]).await;
        assert!(matches!(result, Err(Error::SessionInvalid(_))));
    }

    #[tokio::test]
    async fn test_no_content_skips_decode() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PATCH", ACCOUNT_PATH)
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let client = connected_client(&server, "token");
        let result = client
            .patch::<Account, _>(ACCOUNT_PATH, &[], &json!({"Name": "Acme"}))
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_headers_query_and_payload() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/data/v65.0/sobjects/Account")
            .match_header("authorization", "Bearer token123")
            .match_header("content-type", "application/json")
            .match_header("accept", "application/json")
            .match_header("user-agent", crate::DEFAULT_USER_AGENT)
            .match_query(Matcher::UrlEncoded("fields".into(), "Name,Phone".into()))
            .match_body(Matcher::Json(json!({"Name": "Acme"})))
            .with_status(201)
            .with_body(r#"{"id":"001xx000003DGb2AAG","success":true,"errors":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = connected_client(&server, "token123");
        let result: Option<serde_json::Value> = client
            .post(
                "/services/data/v65.0/sobjects/Account",
                &[("fields", "Name,Phone")],
                &json!({"Name": "Acme"}),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.unwrap()["id"], "001xx000003DGb2AAG");
    }

    #[tokio::test]
    async fn test_expired_session_reauthenticates_and_retries_once() {
        let mut server = Server::new_async().await;
        let stale = server
            .mock("GET", ACCOUNT_PATH)
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(EXPIRED_BODY)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", ACCOUNT_PATH)
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"Id":"001xx000003DGb2AAG","Name":"Acme"}"#)
            .expect(1)
            .create_async()
            .await;
        let token = token_mock(&mut server, "fresh").await;

        let client = connected_client(&server, "stale");
        let account = client.get::<Account>(ACCOUNT_PATH, &[]).await.unwrap();

        stale.assert_async().await;
        fresh.assert_async().await;
        token.assert_async().await;
        assert_eq!(
            account,
            Some(Account {
                id: "001xx000003DGb2AAG".to_string(),
                name: "Acme".to_string(),
            })
        );
        assert_eq!(client.current_access_token().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_second_expiry_is_final() {
        let mut server = Server::new_async().await;
        let data = server
            .mock("GET", ACCOUNT_PATH)
            .with_status(401)
            .with_body(EXPIRED_BODY)
            .expect(2)
            .create_async()
            .await;
        let token = token_mock(&mut server, "fresh").await;

        let client = connected_client(&server, "stale");
        let result = client.get::<Account>(ACCOUNT_PATH, &[]).await;

        data.assert_async().await;
        token.assert_async().await;
        match result {
            Err(Error::Api { errors, method, .. }) => {
                assert!(errors.is_session_expired());
                assert_eq!(method, Method::GET);
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_reauthentication_is_returned() {
        let mut server = Server::new_async().await;
        let data = server
            .mock("GET", ACCOUNT_PATH)
            .with_status(401)
            .with_body(EXPIRED_BODY)
            .expect(1)
            .create_async()
            .await;
        let _mock = server
            .mock("POST", "/services/oauth2/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"expired access/refresh token"}"#)
            .create_async()
            .await;

        let client = connected_client(&server, "stale");
        let result = client.get::<Account>(ACCOUNT_PATH, &[]).await;

        data.assert_async().await;
        assert!(matches!(
            result,
            Err(Error::Auth(client::Error::Auth(_)))
        ));
        assert_eq!(client.current_access_token().unwrap(), "stale");
    }

    #[tokio::test]
    async fn test_domain_error_is_not_retried() {
        let mut server = Server::new_async().await;
        let data = server
            .mock("GET", ACCOUNT_PATH)
            .with_status(404)
            .with_body(r#"[{"errorCode":"NOT_FOUND","message":"The requested resource does not exist"}]"#)
            .expect(1)
            .create_async()
            .await;
        let token = server
            .mock("POST", "/services/oauth2/token")
            .expect(0)
            .create_async()
            .await;

        let client = connected_client(&server, "token");
        let result = client.get::<Account>(ACCOUNT_PATH, &[]).await;

        data.assert_async().await;
        token.assert_async().await;
        match result {
            Err(Error::Api { errors, path, .. }) => {
                assert_eq!(path, ACCOUNT_PATH);
                assert_eq!(errors.0[0].error_code.as_deref(), Some("NOT_FOUND"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_body_returns_decode_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", ACCOUNT_PATH)
            .with_status(200)
            .with_body(r#"{"unexpected":true}"#)
            .create_async()
            .await;

        let client = connected_client(&server, "token");
        let result = client.get::<Account>(ACCOUNT_PATH, &[]).await;
        match result {
            Err(err @ Error::Decode { .. }) => {
                assert!(err.to_string().contains(ACCOUNT_PATH));
                assert!(err.to_string().contains("GET"));
            }
            other => panic!("expected Decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_error_list_returns_decode_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", ACCOUNT_PATH)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = connected_client(&server, "token");
        let result = client.get::<Account>(ACCOUNT_PATH, &[]).await;
        assert!(matches!(result, Err(Error::Decode { .. })));
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retried() {
        let client = Builder::new()
            .credentials(test_credentials("http://127.0.0.1:1"))
            .build()
            .unwrap();
        set_session(&client, "token", "http://127.0.0.1:1");

        let result = client.get::<Account>(ACCOUNT_PATH, &[]).await;
        assert!(matches!(result, Err(Error::Network { .. })));
    }

    #[tokio::test]
    async fn test_delete_returns_unit() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", ACCOUNT_PATH)
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let client = connected_client(&server, "token");
        client.delete(ACCOUNT_PATH, &[]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_reports_error_envelope() {
        let mut server = Server::new_async().await;
        let data = server
            .mock("DELETE", ACCOUNT_PATH)
            .with_status(404)
            .with_body(r#"[{"errorCode":"NOT_FOUND","message":"The requested resource does not exist"}]"#)
            .expect(1)
            .create_async()
            .await;
        let token = server
            .mock("POST", "/services/oauth2/token")
            .expect(0)
            .create_async()
            .await;

        let client = connected_client(&server, "token");
        let result = client.delete(ACCOUNT_PATH, &[]).await;

        data.assert_async().await;
        token.assert_async().await;
        match result {
            Err(Error::Api { errors, method, .. }) => {
                assert_eq!(method, Method::DELETE);
                assert_eq!(errors.0[0].error_code.as_deref(), Some("NOT_FOUND"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_reauthenticates_on_expired_session() {
        let mut server = Server::new_async().await;
        let stale = server
            .mock("DELETE", ACCOUNT_PATH)
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(EXPIRED_BODY)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("DELETE", ACCOUNT_PATH)
            .match_header("authorization", "Bearer fresh")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let token = token_mock(&mut server, "fresh").await;

        let client = connected_client(&server, "stale");
        client.delete(ACCOUNT_PATH, &[]).await.unwrap();

        stale.assert_async().await;
        fresh.assert_async().await;
        token.assert_async().await;
        assert_eq!(client.current_access_token().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_delete_ignores_non_envelope_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("DELETE", ACCOUNT_PATH)
            .with_status(200)
            .with_body(r#"{"id":"001xx000003DGb2AAG","success":true}"#)
            .create_async()
            .await;

        let client = connected_client(&server, "token");
        client.delete(ACCOUNT_PATH, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_calls_retry_independently() {
        let mut server = Server::new_async().await;
        let stale = server
            .mock("GET", ACCOUNT_PATH)
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(EXPIRED_BODY)
            .expect_at_most(4)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", ACCOUNT_PATH)
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"Id":"001","Name":"Acme"}"#)
            .expect(4)
            .create_async()
            .await;
        let url = server.url();
        let token = server
            .mock("POST", "/services/oauth2/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_body("fresh", &url))
            .expect_at_least(1)
            .expect_at_most(4)
            .create_async()
            .await;

        let client = connected_client(&server, "stale");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.get::<Account>(ACCOUNT_PATH, &[]).await })
            })
            .collect();

        for handle in handles {
            let account = handle.await.unwrap().unwrap().unwrap();
            assert_eq!(account.name, "Acme");
        }

        stale.assert_async().await;
        fresh.assert_async().await;
        token.assert_async().await;
    }

    #[test]
    fn test_request_url_encodes_params() {
        let url = request_url(
            "https://na1.salesforce.com",
            "/services/data/v65.0/query",
            &[("q", "SELECT Id FROM Account WHERE Name = 'A&B'")],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://na1.salesforce.com/services/data/v65.0/query?q=SELECT+Id+FROM+Account+WHERE+Name+%3D+%27A%26B%27"
        );

        let url = request_url("https://na1.salesforce.com", "/services/data", &[]).unwrap();
        assert_eq!(url.as_str(), "https://na1.salesforce.com/services/data");
    }

    #[test]
    fn test_request_url_rejects_garbage() {
        let result = request_url("not a url", "/x", &[]);
        assert!(matches!(result, Err(Error::InvalidUrl { .. })));
    }
}
