//! The resilient HTTP transport.
//!
//! Every outbound call passes through [`ResilientTransport::execute`], which
//! attaches credentials, sends the request, classifies failures, and retries
//! recoverable ones with capped, jittered exponential backoff. A 401 under a
//! re-authenticating credential triggers exactly one session refresh and
//! resend.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info, instrument, trace, warn};

use super::auth::CredentialProvider;
use super::classify::{self, Classification, Verdict};
use super::error::{ApiError, RequestSummary, Result, TransportError};
use super::retry::{RetryPolicy, RetryState, Sleeper, TokioSleeper};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Produces a fresh body for every attempt.
pub type BodyFactory = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// The body of an outbound request.
#[derive(Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// A JSON document, encoded per attempt.
    Json(serde_json::Value),
    /// Pre-encoded bytes, passed through unchanged.
    Bytes(Vec<u8>),
    /// A body regenerated for every attempt, for uploads whose stream cannot
    /// be replayed.
    Factory(BodyFactory),
}

impl RequestBody {
    fn render(&self) -> Result<Option<Vec<u8>>> {
        match self {
            RequestBody::Empty => Ok(None),
            RequestBody::Json(value) => serde_json::to_vec(value)
                .map(Some)
                .map_err(|e| ApiError::Encode(e.to_string())),
            RequestBody::Bytes(bytes) => Ok(Some(bytes.clone())),
            RequestBody::Factory(factory) => Ok(Some(factory())),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bodies may carry credentials; only describe their shape.
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Json(_) => write!(f, "Json(..)"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Factory(_) => write!(f, "Factory(..)"),
        }
    }
}

/// A logical request, replayable across retries.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Add a header, replacing any previous value.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add several query parameters.
    pub fn query_pairs(mut self, pairs: &[(String, String)]) -> Self {
        self.query.extend_from_slice(pairs);
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(bytes);
        self
    }

    pub fn body_factory(mut self, factory: BodyFactory) -> Self {
        self.body = RequestBody::Factory(factory);
        self
    }
}

/// One concrete attempt, as handed to the [`HttpSender`].
#[derive(Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl PreparedRequest {
    fn summary(&self) -> RequestSummary {
        RequestSummary {
            method: self.method.to_string(),
            url: self.url.clone(),
        }
    }
}

impl fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.keys().map(|k| k.as_str()).collect();
        f.debug_struct("PreparedRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

/// A raw HTTP response with a fully read body.
#[derive(Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub url: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            url: String::new(),
        }
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// A header value as text, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON. An empty body yields an empty object.
    pub fn json(&self) -> Result<serde_json::Value> {
        if self.body.is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", self.url, e))
        })
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set-Cookie and friends stay out of debug output.
        let header_names: Vec<&str> = self.headers.keys().map(|k| k.as_str()).collect();
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// The kind of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// DNS failure, refused or reset connection.
    Connect,
    /// The per-call timeout elapsed.
    Timeout,
    /// The connection broke while the exchange was in flight.
    Io,
    /// Anything else, such as an unbuildable request.
    Other,
}

/// A failure below HTTP: no response was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
    pub kind: SendErrorKind,
    pub message: String,
}

impl SendError {
    pub fn new(kind: SendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        !matches!(self.kind, SendErrorKind::Other)
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for SendError {}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_connect() {
            SendErrorKind::Connect
        } else if err.is_timeout() {
            SendErrorKind::Timeout
        } else if err.is_request() || err.is_body() {
            SendErrorKind::Io
        } else {
            SendErrorKind::Other
        };
        SendError::new(kind, err.to_string())
    }
}

/// The request/response primitive the transport wraps.
#[async_trait]
pub trait HttpSender: Send + Sync + fmt::Debug {
    async fn send(&self, request: &PreparedRequest) -> std::result::Result<RawResponse, SendError>;
}

/// [`HttpSender`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: Client,
}

impl ReqwestSender {
    /// Build a sender whose calls each time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn send(&self, request: &PreparedRequest) -> std::result::Result<RawResponse, SendError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

/// Wraps an [`HttpSender`] with credentials, classification and retries.
#[derive(Debug)]
pub struct ResilientTransport {
    sender: Arc<dyn HttpSender>,
    credential: Arc<dyn CredentialProvider>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    default_headers: HeaderMap,
    confidential: bool,
}

impl ResilientTransport {
    pub fn new(sender: Arc<dyn HttpSender>, credential: Arc<dyn CredentialProvider>) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        default_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        Self {
            sender,
            credential,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            default_headers,
            confidential: true,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Merge extra headers into every request.
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.default_headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// When disabled, the body of a request that failed for good is logged
    /// at trace level. Header values are never logged.
    pub fn with_confidential_logging(mut self, confidential: bool) -> Self {
        self.confidential = confidential;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sender(&self) -> &Arc<dyn HttpSender> {
        &self.sender
    }

    /// Send a request, retrying recoverable failures.
    ///
    /// Returns the first 2xx response. Fails with [`ApiError::Transport`]
    /// carrying the last response (or last connection failure) once the
    /// failure is fatal or retries are exhausted.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: Request) -> Result<RawResponse> {
        let mut state = RetryState::new(&self.policy);
        let mut reauthenticated = false;

        loop {
            let mut prepared = self.prepare(&request)?;
            let session = match self.credential.attach(&mut prepared, self.sender.as_ref()).await {
                Ok(session) => session,
                Err(err) => {
                    self.retry_login(&mut state, &prepared, err).await?;
                    continue;
                }
            };

            debug!(
                attempt = state.attempt() + 1,
                max_attempts = state.max_attempts() + 1,
                "Sending request"
            );

            let response = match self.sender.send(&prepared).await {
                Ok(response) => response,
                Err(err) => {
                    let verdict = classify::classify_send_error(&err);
                    if verdict.is_recoverable() && state.can_retry() {
                        self.backoff(&mut state, &prepared, &verdict).await;
                        continue;
                    }
                    self.log_failed_body(&prepared);
                    return Err(TransportError {
                        status_code: None,
                        url: prepared.url.clone(),
                        message: verdict.message,
                        request: prepared.summary(),
                        response: None,
                    }
                    .into());
                }
            };

            if response.status == StatusCode::UNAUTHORIZED
                && self.credential.can_reauthenticate()
                && !reauthenticated
            {
                reauthenticated = true;
                info!(method = %prepared.method, url = %prepared.url, "Session rejected, re-authenticating");
                if let Err(err) = self.credential.reauthenticate(self.sender.as_ref(), session).await {
                    self.retry_login(&mut state, &prepared, err).await?;
                }
                continue;
            }

            if response.status.is_success() && !classify::is_session_glitch(&response) {
                return Ok(response);
            }

            let verdict = classify::classify_response(&response);
            if verdict.is_recoverable() && state.can_retry() {
                self.backoff(&mut state, &prepared, &verdict).await;
                continue;
            }

            self.log_failed_body(&prepared);
            if self.confidential {
                debug!(
                    status = %response.status,
                    classification = ?verdict.classification,
                    "Request failed"
                );
            } else {
                debug!(status = %response.status, "Request failed: {}", verdict.message);
            }
            return Err(TransportError {
                status_code: Some(response.status.as_u16()),
                url: prepared.url.clone(),
                message: verdict.message,
                request: prepared.summary(),
                response: Some(response),
            }
            .into());
        }
    }

    /// GET a URL and parse the body as JSON.
    pub async fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<serde_json::Value> {
        let response = self.execute(Request::get(url).query_pairs(query)).await?;
        response.json()
    }

    fn prepare(&self, request: &Request) -> Result<PreparedRequest> {
        let mut headers = self.default_headers.clone();
        for (name, value) in request.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        Ok(PreparedRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers,
            query: request.query.clone(),
            body: request.body.render()?,
        })
    }

    /// Back off after a session endpoint could not be reached, consuming
    /// one retry. Any other login error, or an exhausted budget, is returned.
    async fn retry_login(
        &self,
        state: &mut RetryState,
        prepared: &PreparedRequest,
        err: ApiError,
    ) -> Result<()> {
        let (url, source) = match err {
            ApiError::LoginUnreachable { url, source } => (url, source),
            other => return Err(other),
        };

        let verdict = classify::classify_send_error(&source);
        if verdict.is_recoverable() && state.can_retry() {
            debug!(session_url = %url, "Session endpoint unreachable");
            self.backoff(state, prepared, &verdict).await;
            return Ok(());
        }

        Err(TransportError {
            status_code: None,
            request: RequestSummary {
                method: Method::POST.to_string(),
                url: url.clone(),
            },
            url,
            message: verdict.message,
            response: None,
        }
        .into())
    }

    async fn backoff(&self, state: &mut RetryState, prepared: &PreparedRequest, verdict: &Verdict) {
        if let Some(limits) = &verdict.rate_limit {
            info!(
                fill_rate = ?limits.fill_rate,
                interval_seconds = ?limits.interval_seconds,
                limit = ?limits.limit,
                retry_after = ?limits.retry_after,
                "Rate limited by server; retry-after is not honored, using exponential backoff"
            );
        }

        let retry_number = state.attempt() + 1;
        let delay = match verdict.classification {
            Classification::Fatal => Duration::ZERO,
            Classification::Recoverable | Classification::RecoverableNoDelay => {
                state.next_delay(&self.policy)
            }
        };

        if self.confidential {
            warn!(
                method = %prepared.method,
                url = %prepared.url,
                attempt = retry_number,
                max_retries = state.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                classification = ?verdict.classification,
                "Recoverable failure, retrying"
            );
        } else {
            warn!(
                method = %prepared.method,
                url = %prepared.url,
                attempt = retry_number,
                max_retries = state.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "Recoverable failure, retrying: {}",
                verdict.message
            );
        }

        self.sleeper.sleep(delay).await;
    }

    fn log_failed_body(&self, prepared: &PreparedRequest) {
        if self.confidential {
            return;
        }
        if let Some(body) = &prepared.body {
            trace!(body = %String::from_utf8_lossy(body), "Body of failed request");
        }
    }
}
