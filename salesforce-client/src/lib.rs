//! Unofficial Rust client for the Salesforce REST API and its CometD
//! streaming channel.
//!
//! This crate provides OAuth2 authentication, an authenticated request
//! pipeline that transparently recovers from expired sessions, and a
//! long-polling streaming session for PushTopic, platform event and change
//! data capture channels.
//!
//! # Examples
//!
//! ```no_run
//! use salesforce_client::client::{self, Credentials, Environment};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = client::Builder::new()
//!     .credentials(Credentials {
//!         client_id: "...".to_string(),
//!         client_secret: Some("...".to_string()),
//!         username: Some("user@example.com".to_string()),
//!         password: Some("...".to_string()),
//!         security_token: Some("...".to_string()),
//!         refresh_token: None,
//!         login_uri: None,
//!         environment: Environment::Production,
//!     })
//!     .build()?
//!     .connect()
//!     .await?;
//!
//! let limits: serde_json::Value = client
//!     .get(&client.data_path("/limits"), &[])
//!     .await?
//!     .unwrap_or_default();
//! # Ok(())
//! # }
//! ```

/// Default Salesforce API version (Winter '26 - API version 65.0).
pub const DEFAULT_API_VERSION: &str = "65.0";

/// Default CometD protocol version used in the streaming endpoint path.
pub const DEFAULT_COMETD_VERSION: &str = "40.0";

/// Default `User-Agent` header, `<product>/<version>`.
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout for HTTP requests (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default request timeout for REST calls (120 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default timeout for a single streaming long poll (130 seconds).
///
/// Salesforce holds a `/meta/connect` open for up to 110 seconds before
/// answering with an empty batch.
pub const DEFAULT_LONG_POLL_TIMEOUT_SECS: u64 = 130;

/// Default connection timeout for OAuth2 authentication requests (15 seconds).
pub const DEFAULT_AUTH_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default request timeout for OAuth2 authentication requests (30 seconds).
pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 30;

/// TCP keepalive interval for pooled connections (60 seconds).
pub const DEFAULT_TCP_KEEPALIVE_SECS: u64 = 60;

/// Maximum idle connections kept per host.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Idle connections are closed after this many seconds.
pub const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Salesforce API error envelope and session-expiry detection.
pub mod api_error;

/// OAuth2 authentication, credentials and session management.
pub mod client;

/// Authenticated REST request pipeline.
pub mod rest;

/// CometD streaming session.
pub mod streaming;

pub use api_error::{ApiError, ApiErrors, INVALID_SESSION_ID};
pub use client::{Builder, Client};
