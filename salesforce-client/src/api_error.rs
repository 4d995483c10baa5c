//! Salesforce API error envelope.
//!
//! Failed REST calls answer with a JSON array of error objects instead of the
//! requested resource. The OAuth2 token endpoint answers with a single object
//! using the `error`/`error_description` pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code reported when the bearer token is stale or revoked.
pub const INVALID_SESSION_ID: &str = "INVALID_SESSION_ID";

/// A single error entry reported by the Salesforce API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Fields the error relates to, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Human readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Machine readable code such as `INVALID_SESSION_ID`.
    #[serde(
        rename = "errorCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_code: Option<String>,
    /// OAuth2 error name such as `invalid_grant`.
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error_name: Option<String>,
    /// OAuth2 error description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ApiError {
    /// Returns true when at least one field carries a value.
    ///
    /// Any JSON object decodes into an `ApiError` because every field is
    /// optional, so an all-empty value means the body was something else.
    pub fn is_populated(&self) -> bool {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|v| !v.is_empty())
        }

        !self.fields.is_empty()
            || present(&self.message)
            || present(&self.error_code)
            || present(&self.error_name)
            || present(&self.error_description)
    }

    /// Returns true if this entry reports an expired or invalid session.
    pub fn is_session_expired(&self) -> bool {
        self.error_code.as_deref() == Some(INVALID_SESSION_ID)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self
            .error_code
            .as_deref()
            .or(self.error_name.as_deref())
            .unwrap_or("UNKNOWN");
        let message = self
            .message
            .as_deref()
            .or(self.error_description.as_deref())
            .unwrap_or("");
        write!(f, "{code}: {message}")?;
        if !self.fields.is_empty() {
            write!(f, " (fields: {})", self.fields.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Ordered list of errors returned in place of a domain object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiErrors(pub Vec<ApiError>);

impl ApiErrors {
    /// Parses a response body as an error envelope.
    ///
    /// Returns `None` unless the body is a JSON array with at least one entry.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(body)
            .ok()
            .filter(|errors| !errors.is_empty())
    }

    /// Returns true if the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, ApiError> {
        self.0.iter()
    }

    /// Returns true if any entry carries [`INVALID_SESSION_ID`].
    pub fn is_session_expired(&self) -> bool {
        self.0.iter().any(ApiError::is_session_expired)
    }
}

impl fmt::Display for ApiErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiErrors {}

impl<'a> IntoIterator for &'a ApiErrors {
    type Item = &'a ApiError;
    type IntoIter = std::slice::Iter<'a, ApiError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
