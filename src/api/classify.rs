//! Failure classification for the resilient transport.
//!
//! The classifier never raises. It inspects a response (or a send failure)
//! and reports whether the exchange is fatal or worth retrying, together with
//! the best human readable message it can extract. The retry decision itself
//! belongs to the transport.

use reqwest::StatusCode;

use super::transport::{RawResponse, SendError};

/// Header JIRA uses to explain why authentication was denied.
const AUTH_DENIED_REASON: &str = "x-authentication-denied-reason";

/// Header JIRA uses to report the login state of a request.
const LOGIN_REASON: &str = "x-seraph-loginreason";

/// Login reason reported alongside the empty-200 session glitch.
const AUTHENTICATED_FAILED: &str = "AUTHENTICATED_FAILED";

/// Outcome category of a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Surface the error to the caller.
    Fatal,
    /// Retry after the transport's backoff delay.
    Recoverable,
    /// Retry without honoring any server-advertised delay. The transport
    /// still applies its own capped exponential backoff.
    RecoverableNoDelay,
}

impl Classification {
    /// Whether the exchange may be retried.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Classification::Fatal)
    }
}

/// Token bucket parameters a rate-limited response advertises.
///
/// These are logged for observability only; the transport does not wait for
/// `retry_after`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub fill_rate: Option<String>,
    pub interval_seconds: Option<String>,
    pub limit: Option<String>,
    pub retry_after: Option<String>,
}

impl RateLimitInfo {
    fn from_response(response: &RawResponse) -> Self {
        Self {
            fill_rate: response.header("x-ratelimit-fillrate").map(str::to_string),
            interval_seconds: response
                .header("x-ratelimit-interval-seconds")
                .map(str::to_string),
            limit: response.header("x-ratelimit-limit").map(str::to_string),
            retry_after: response.header("retry-after").map(str::to_string),
        }
    }
}

/// The classifier's verdict on one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Classification,
    /// Short reason, safe to log.
    pub message: String,
    /// Present for 429 responses.
    pub rate_limit: Option<RateLimitInfo>,
}

impl Verdict {
    fn new(classification: Classification, message: impl Into<String>) -> Self {
        Self {
            classification,
            message: message.into(),
            rate_limit: None,
        }
    }

    /// Whether the exchange may be retried.
    pub fn is_recoverable(&self) -> bool {
        self.classification.is_recoverable()
    }
}

/// Classify a transport-level failure.
///
/// Connection failures (DNS, refused, reset, timeouts) are recoverable;
/// anything else, such as a malformed request, is not.
pub fn classify_send_error(error: &SendError) -> Verdict {
    if error.is_connection_failure() {
        Verdict::new(Classification::Recoverable, error.to_string())
    } else {
        Verdict::new(Classification::Fatal, error.to_string())
    }
}

/// Classify a response the transport did not accept outright.
pub fn classify_response(response: &RawResponse) -> Verdict {
    if is_session_glitch(response) {
        return Verdict::new(
            Classification::Recoverable,
            "empty 200 response with AUTHENTICATED_FAILED login reason (JRA-41559)",
        );
    }

    if response.status == StatusCode::TOO_MANY_REQUESTS {
        let mut verdict = Verdict::new(
            Classification::RecoverableNoDelay,
            format!("rate limited: {}", extract_error_message(response)),
        );
        verdict.rate_limit = Some(RateLimitInfo::from_response(response));
        return verdict;
    }

    Verdict::new(Classification::Fatal, extract_error_message(response))
}

/// Detect the server bug where a valid session is answered with an empty 200.
///
/// A same-URL retry succeeds once the server's session cache catches up.
pub fn is_session_glitch(response: &RawResponse) -> bool {
    response.status == StatusCode::OK
        && response.body.is_empty()
        && response
            .header(LOGIN_REASON)
            .map(|reason| reason.contains(AUTHENTICATED_FAILED))
            .unwrap_or(false)
}

/// Extract a human readable error message from a failed response.
///
/// Precedence: the authentication-denied header, a `message` field, the
/// first entry of `errorMessages`, the values of `errors` joined with ", ",
/// and finally the raw body text.
pub fn extract_error_message(response: &RawResponse) -> String {
    if let Some(reason) = response.header(AUTH_DENIED_REASON) {
        return reason.to_string();
    }

    let text = response.text();
    if text.is_empty() {
        return String::new();
    }

    let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) else {
        return text;
    };

    if let Some(message) = json.get("message") {
        return value_to_message(message);
    }

    if let Some(messages) = json.get("errorMessages") {
        match messages {
            serde_json::Value::Array(arr) if !arr.is_empty() => {
                return value_to_message(&arr[0]);
            }
            serde_json::Value::String(s) if !s.is_empty() => return s.clone(),
            _ => {}
        }
    }

    if let Some(errors) = json.get("errors").and_then(|e| e.as_object()) {
        if !errors.is_empty() {
            return errors
                .values()
                .map(value_to_message)
                .collect::<Vec<_>>()
                .join(", ");
        }
    }

    text
}

fn value_to_message(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
