//! API error types for the JIRA transport.

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

use super::transport::{RawResponse, SendError};

/// Errors that can occur when interacting with the JIRA API.
///
/// Recoverable conditions (connection resets, rate limiting, the stale
/// session glitch, a single expired cookie session) never surface here; they
/// are absorbed by the transport. Only terminal outcomes cross that boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A request failed for good, either with a fatal HTTP status or after
    /// exhausting retries.
    #[error("{0}")]
    Transport(Box<TransportError>),

    /// The cookie session login was rejected.
    #[error("Session login failed (HTTP {status}): {message}")]
    LoginFailed {
        /// Status returned by the session endpoint.
        status: u16,
        /// Message extracted from the login response.
        message: String,
    },

    /// The session endpoint could not be reached. The transport retries
    /// this like any other connection failure.
    #[error("Could not reach session endpoint {url}: {source}")]
    LoginUnreachable {
        /// The session endpoint.
        url: String,
        /// The underlying send failure.
        #[source]
        source: SendError,
    },

    /// A successful response did not have the expected shape.
    #[error("Failed to materialize response: {message}")]
    Materialization {
        /// What was missing.
        message: String,
        /// The offending payload.
        payload: serde_json::Value,
    },

    /// The response body could not be parsed.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// A request body could not be encoded.
    #[error("Failed to encode request body: {0}")]
    Encode(String),

    /// Invalid URL or URL template.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Client options that cannot be applied.
    #[error("Invalid client options: {0}")]
    InvalidOptions(String),

    /// A credential cannot be sent as a header.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// A concurrent page worker died before reporting.
    #[error("Page worker failed: {0}")]
    Worker(String),

    /// The HTTP client itself could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Transport(e) => e.status_code.and_then(|s| StatusCode::from_u16(s).ok()),
            ApiError::LoginFailed { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    /// Whether the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Whether the server rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::LoginFailed { .. })
            || self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    pub(crate) fn materialization(message: impl Into<String>, payload: &serde_json::Value) -> Self {
        ApiError::Materialization {
            message: message.into(),
            payload: payload.clone(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::Transport(Box::new(err))
    }
}

/// The request half of a failed exchange.
///
/// Only the verb and URL are kept; headers and bodies may hold credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    /// HTTP verb.
    pub method: String,
    /// Full request URL, without query parameters.
    pub url: String,
}

/// A terminal transport failure.
#[derive(Debug)]
pub struct TransportError {
    /// HTTP status of the last response, `None` for connection failures.
    pub status_code: Option<u16>,
    /// The URL that failed.
    pub url: String,
    /// Best-effort human readable message.
    pub message: String,
    /// The request that failed.
    pub request: RequestSummary,
    /// The last response received, if the server answered at all.
    pub response: Option<RawResponse>,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "JiraError HTTP {}", status)?,
            None => write!(f, "JiraError connection failure")?,
        }
        write!(f, " url: {}", self.url)?;
        if !self.message.is_empty() {
            write!(f, "\n\ttext: {}", self.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_error(status: Option<u16>) -> ApiError {
        TransportError {
            status_code: status,
            url: "https://jira.example.com/rest/api/2/issue/PROJ-1".to_string(),
            message: "Issue does not exist".to_string(),
            request: RequestSummary {
                method: "GET".to_string(),
                url: "https://jira.example.com/rest/api/2/issue/PROJ-1".to_string(),
            },
            response: None,
        }
        .into()
    }

    #[test]
    fn test_transport_error_display() {
        let err = transport_error(Some(404));
        assert_eq!(
            err.to_string(),
            "JiraError HTTP 404 url: https://jira.example.com/rest/api/2/issue/PROJ-1\n\ttext: Issue does not exist"
        );
    }

    #[test]
    fn test_connection_failure_display() {
        let err = transport_error(None);
        assert!(err.to_string().starts_with("JiraError connection failure"));
        assert!(err.status().is_none());
    }

    #[test]
    fn test_status_helpers() {
        assert!(transport_error(Some(404)).is_not_found());
        assert!(transport_error(Some(401)).is_unauthorized());
        assert!(!transport_error(Some(500)).is_unauthorized());
    }

    #[test]
    fn test_login_failed_is_unauthorized() {
        let err = ApiError::LoginFailed {
            status: 403,
            message: "CAPTCHA_CHALLENGE".to_string(),
        };
        assert!(err.is_unauthorized());
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_materialization_carries_payload() {
        let payload = serde_json::json!({"startAt": 0});
        let err = ApiError::materialization("missing key 'issues'", &payload);
        match err {
            ApiError::Materialization { payload: p, message } => {
                assert_eq!(p, payload);
                assert!(message.contains("issues"));
            }
            _ => panic!("Expected Materialization error"),
        }
    }
}
