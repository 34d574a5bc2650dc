//! Client behavior options.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};
use crate::api::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_SECS, DEFAULT_MAX_RETRIES};
use crate::api::transport::DEFAULT_TIMEOUT_SECS;
use crate::api::{DEFAULT_ASYNC_WORKERS, DEFAULT_SESSION_REFRESH};

/// Key in `default_batch_size` that applies to every unlisted kind.
pub const WILDCARD_BATCH_KEY: &str = "*";

/// Options controlling how the client talks to a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientOptions {
    /// Base server URL, e.g. `https://company.atlassian.net`.
    pub server: String,
    /// Core REST API path segment.
    pub rest_path: String,
    pub rest_api_version: String,
    /// Agile REST API path segment.
    pub agile_rest_path: String,
    pub agile_rest_api_version: String,
    /// Cookie session endpoint, relative to `server`.
    pub auth_url: String,
    /// Per-call timeout. Applies to each HTTP call, not the whole retry loop.
    pub timeout_secs: u64,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Backoff base unit.
    pub retry_base_delay_ms: u64,
    /// Cap on any single backoff delay.
    pub max_retry_delay_secs: u64,
    /// Fetch remaining pages concurrently once the first page reveals the
    /// total.
    pub concurrent_fetch: bool,
    /// Concurrent page requests in flight.
    pub async_workers: usize,
    /// Page size used when the caller asks for everything, keyed by resource
    /// kind name; `"*"` covers unlisted kinds.
    pub default_batch_size: BTreeMap<String, u32>,
    /// Pause between an update and the reload that follows it.
    pub delay_reload_ms: u64,
    /// Never log request bodies, even on failure.
    pub confidential_logging: bool,
    /// Expose custom fields under their display names as well.
    pub display_name_aliases: bool,
    /// Age at which a cookie session is replaced before use. 0 keeps a
    /// session until the server rejects it.
    pub session_refresh_secs: u64,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server: String::new(),
            rest_path: "api".to_string(),
            rest_api_version: "2".to_string(),
            agile_rest_path: "agile".to_string(),
            agile_rest_api_version: "1.0".to_string(),
            auth_url: "/rest/auth/1/session".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_retry_delay_secs: DEFAULT_MAX_DELAY_SECS,
            concurrent_fetch: false,
            async_workers: DEFAULT_ASYNC_WORKERS,
            default_batch_size: BTreeMap::from([(WILDCARD_BATCH_KEY.to_string(), 100)]),
            delay_reload_ms: 0,
            confidential_logging: true,
            display_name_aliases: false,
            session_refresh_secs: DEFAULT_SESSION_REFRESH.as_secs(),
            headers: BTreeMap::new(),
        }
    }
}

impl ClientOptions {
    /// Default options for `server`.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Default::default()
        }
    }

    /// Validate the server URL and every other setting.
    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(ConfigError::ValidationError(
                "server URL cannot be empty".to_string(),
            ));
        }
        if !self.server.starts_with("https://") && !self.server.starts_with("http://") {
            return Err(ConfigError::ValidationError(format!(
                "server URL '{}' must start with http:// or https://",
                self.server
            )));
        }
        self.validate_settings()
    }

    /// Validate everything except the server URL.
    pub fn validate_settings(&self) -> Result<()> {
        if self.async_workers == 0 {
            return Err(ConfigError::ValidationError(
                "async_workers must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }

    pub fn delay_reload(&self) -> Duration {
        Duration::from_millis(self.delay_reload_ms)
    }

    pub fn session_refresh(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.session_refresh_secs)).filter(|interval| !interval.is_zero())
    }

    /// The page size for `kind` when the caller did not choose one.
    ///
    /// `None` means no limit is sent and the server picks its own page size.
    pub fn batch_size_for(&self, kind: &str) -> Option<u32> {
        self.default_batch_size
            .get(kind)
            .or_else(|| self.default_batch_size.get(WILDCARD_BATCH_KEY))
            .copied()
            .filter(|size| *size > 0)
    }

    /// The full cookie session endpoint URL.
    pub fn session_url(&self) -> String {
        format!("{}{}", self.server.trim_end_matches('/'), self.auth_url)
    }
}
