//! Centralized error types for jirakit.
//!
//! Library callers usually handle [`ApiError`] or [`ConfigError`] directly;
//! [`Error`] is for applications that want one type with user-facing
//! messages.

use thiserror::Error as ThisError;

use crate::api::error::ApiError;
use crate::config::ConfigError;

/// The top-level error type.
///
/// Aggregates every error the crate can produce, keeping the underlying
/// error for debugging.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Configuration-related errors.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// API-related errors.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// IO errors (file system, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get a user-friendly message for display.
    pub fn user_message(&self) -> String {
        match self {
            Error::Config(ConfigError::ValidationError(msg)) => format!("Configuration error: {}", msg),
            Error::Api(e) => api_message(e),
            Error::Io(_) => "A file operation failed. Please check file permissions.".to_string(),
        }
    }

    /// Check if retrying the operation later may succeed.
    ///
    /// The transport already retried transient failures, so this only holds
    /// for conditions that can change on the server side: throttling,
    /// connection loss and server errors.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Api(e @ ApiError::Transport(_)) => match e.status() {
                None => true,
                Some(status) => status.as_u16() == 429 || status.is_server_error(),
            },
            Error::Api(ApiError::Worker(_)) => true,
            _ => false,
        }
    }

    /// Get a suggested action for the user.
    pub fn suggested_action(&self) -> Option<&'static str> {
        match self {
            Error::Api(ApiError::LoginFailed { .. }) => {
                Some("Log in through the web interface once to clear any CAPTCHA challenge.")
            }
            Error::Api(e) if e.is_unauthorized() => {
                Some("Check your API token at https://id.atlassian.com/manage-profile/security/api-tokens")
            }
            Error::Api(e) if e.status().map(|s| s.as_u16()) == Some(429) => {
                Some("Wait a few seconds and try again.")
            }
            Error::Api(ApiError::LoginUnreachable { .. }) => {
                Some("Check your internet connection and JIRA URL.")
            }
            Error::Api(e) if matches!(e, ApiError::Transport(_)) && e.status().is_none() => {
                Some("Check your internet connection and JIRA URL.")
            }
            _ => None,
        }
    }
}

fn api_message(e: &ApiError) -> String {
    match e {
        ApiError::Transport(t) => match t.status_code {
            None => "Connection failed. Please check your internet connection.".to_string(),
            Some(401) => "Authentication failed. Please check your username and API token.".to_string(),
            Some(403) => "Access denied. You don't have permission to access this resource.".to_string(),
            Some(404) => format!("'{}' was not found.", t.url),
            Some(429) => "Too many requests. Please wait a moment and try again.".to_string(),
            Some(status) if status >= 500 => "JIRA server error. Please try again later.".to_string(),
            Some(_) if !t.message.is_empty() => format!("JIRA rejected the request: {}", t.message),
            Some(status) => format!("JIRA rejected the request (HTTP {}).", status),
        },
        ApiError::LoginFailed { message, .. } => format!("Session login failed: {}", message),
        ApiError::LoginUnreachable { .. } => {
            "Could not reach the login endpoint. Please check your internet connection.".to_string()
        }
        ApiError::Materialization { .. } | ApiError::InvalidResponse(_) => {
            "Unexpected response from JIRA. Please try again.".to_string()
        }
        ApiError::Encode(_) => "Could not encode the request.".to_string(),
        ApiError::InvalidUrl(_) => "Invalid JIRA URL in configuration.".to_string(),
        ApiError::InvalidOptions(msg) => format!("Invalid client options: {}", msg),
        ApiError::InvalidCredential(_) => {
            "The credential cannot be sent to JIRA. Please check it for invalid characters.".to_string()
        }
        ApiError::Worker(_) => "A background request failed. Please try again.".to_string(),
        ApiError::Client(_) => "Could not set up the HTTP client.".to_string(),
    }
}

/// Result type for application operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::{RequestSummary, TransportError};
    use crate::api::transport::{SendError, SendErrorKind};

    fn transport(status: Option<u16>) -> Error {
        Error::Api(
            TransportError {
                status_code: status,
                url: "https://jira.example.com/rest/api/2/issue/PROJ-123".to_string(),
                message: String::new(),
                request: RequestSummary {
                    method: "GET".to_string(),
                    url: "https://jira.example.com/rest/api/2/issue/PROJ-123".to_string(),
                },
                response: None,
            }
            .into(),
        )
    }

    #[test]
    fn test_error_from_config_error() {
        let err: Error = ConfigError::ValidationError("async_workers must be at least 1".to_string()).into();
        assert!(matches!(err, Error::Config(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_error_from_api_error() {
        let err: Error = ApiError::Worker("page 3 panicked".to_string()).into();
        assert!(matches!(err, Error::Api(ApiError::Worker(_))));
    }

    #[test]
    fn test_user_message_unauthorized() {
        let msg = transport(Some(401)).user_message();
        assert!(msg.contains("Authentication failed"));
        assert!(msg.contains("API token"));
    }

    #[test]
    fn test_user_message_not_found() {
        let msg = transport(Some(404)).user_message();
        assert!(msg.contains("PROJ-123"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_user_message_connection_failed() {
        assert!(transport(None).user_message().contains("Connection failed"));
    }

    #[test]
    fn test_user_message_config_validation() {
        let err = Error::Config(ConfigError::ValidationError("server URL cannot be empty".to_string()));
        assert!(err.user_message().contains("server URL cannot be empty"));
    }

    #[test]
    fn test_user_message_login_failed() {
        let err = Error::Api(ApiError::LoginFailed {
            status: 403,
            message: "CAPTCHA_CHALLENGE".to_string(),
        });
        assert!(err.user_message().contains("CAPTCHA_CHALLENGE"));
        assert!(err.suggested_action().is_some());
    }

    #[test]
    fn test_unreachable_login_suggests_checking_connection() {
        let err = Error::Api(ApiError::LoginUnreachable {
            url: "https://jira.example.com/rest/auth/1/session".to_string(),
            source: SendError::new(SendErrorKind::Connect, "connection refused"),
        });
        assert!(err.user_message().contains("login endpoint"));
        assert!(err.suggested_action().is_some_and(|a| a.contains("internet connection")));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(transport(Some(429)).is_recoverable());
        assert!(transport(Some(503)).is_recoverable());
        assert!(transport(None).is_recoverable());
        assert!(!transport(Some(401)).is_recoverable());
        assert!(!transport(Some(404)).is_recoverable());
        assert!(!Error::Config(ConfigError::ValidationError("x".to_string())).is_recoverable());
    }

    #[test]
    fn test_suggested_action_unauthorized() {
        let action = transport(Some(401)).suggested_action();
        assert!(action.is_some_and(|a| a.contains("api-tokens")));
    }

    #[test]
    fn test_suggested_action_rate_limited() {
        let action = transport(Some(429)).suggested_action();
        assert!(action.is_some_and(|a| a.contains("try again")));
    }

    #[test]
    fn test_no_suggestion_for_not_found() {
        assert!(transport(Some(404)).suggested_action().is_none());
    }
}
