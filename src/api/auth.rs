//! Credential strategies for the JIRA transport.
//!
//! Exactly one [`CredentialProvider`] is bound to a transport for its
//! lifetime. Basic, bearer and anonymous credentials are immutable; cookie
//! sessions live in [`super::cookie::CookieAuth`]. OAuth1 or Kerberos
//! strategies only need to implement the trait.

use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{self, HeaderValue};

use super::error::{ApiError, Result};
use super::transport::{HttpSender, PreparedRequest};

/// A pluggable credential strategy.
#[async_trait]
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// Attach credentials to an outbound request.
    ///
    /// Returns the session generation the request was signed with; providers
    /// without sessions return 0.
    async fn attach(&self, request: &mut PreparedRequest, sender: &dyn HttpSender) -> Result<u64>;

    /// Whether a 401 can be cured by [`CredentialProvider::reauthenticate`].
    fn can_reauthenticate(&self) -> bool {
        false
    }

    /// Refresh a session rejected by the server.
    ///
    /// `stale_generation` is the value `attach` returned for the rejected
    /// request, so concurrent callers can tell whether someone else already
    /// refreshed.
    async fn reauthenticate(&self, _sender: &dyn HttpSender, _stale_generation: u64) -> Result<()> {
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map(|mut v| {
            v.set_sensitive(true);
            v
        })
        .map_err(|_| ApiError::InvalidCredential("not a valid header value".to_string()))
}

/// Basic authentication (username or email + password or API token).
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    /// The complete "Basic ..." header value.
    auth_header: String,
}

impl BasicAuth {
    /// Create credentials. The secret is encoded immediately and not stored.
    pub fn new(username: &str, secret: &str) -> Self {
        Self {
            username: username.to_string(),
            auth_header: build_auth_header(username, secret),
        }
    }

    /// Get the authorization header value.
    pub fn header_value(&self) -> &str {
        &self.auth_header
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for BasicAuth {
    async fn attach(&self, request: &mut PreparedRequest, _sender: &dyn HttpSender) -> Result<u64> {
        request
            .headers
            .insert(header::AUTHORIZATION, header_value(&self.auth_header)?);
        Ok(0)
    }
}

/// Bearer token authentication (personal access tokens).
#[derive(Clone)]
pub struct TokenAuth {
    token: String,
}

impl TokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenAuth { .. }")
    }
}

#[async_trait]
impl CredentialProvider for TokenAuth {
    async fn attach(&self, request: &mut PreparedRequest, _sender: &dyn HttpSender) -> Result<u64> {
        request.headers.insert(
            header::AUTHORIZATION,
            header_value(&format!("Bearer {}", self.token))?,
        );
        Ok(0)
    }
}

/// No credentials at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl CredentialProvider for Anonymous {
    async fn attach(&self, _request: &mut PreparedRequest, _sender: &dyn HttpSender) -> Result<u64> {
        Ok(0)
    }
}

/// Build the Basic Auth header value.
fn build_auth_header(username: &str, secret: &str) -> String {
    let credentials = format!("{}:{}", username, secret);
    format!("Basic {}", BASE64.encode(credentials.as_bytes()))
}
