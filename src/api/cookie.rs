//! Cookie session authentication.
//!
//! [`CookieAuth`] logs in against the server's session endpoint, keeps the
//! returned cookies in a jar, and refreshes them when the transport reports a
//! 401. Logins are serialized: concurrent requests rejected with the same
//! stale session share a single re-login.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Method;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::auth::CredentialProvider;
use super::classify;
use super::error::{ApiError, Result};
use super::transport::{HttpSender, PreparedRequest, RawResponse};

/// Header that disables XSRF checks on cookie-authenticated writes.
const ATLASSIAN_TOKEN: &str = "x-atlassian-token";

/// How long a session is used before a proactive re-login.
pub const DEFAULT_SESSION_REFRESH: Duration = Duration::from_secs(300);

/// Session cookies, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CookieJar(BTreeMap<String, String>);

impl CookieJar {
    fn header_value(&self) -> String {
        self.0
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Default)]
struct SessionState {
    jar: Option<CookieJar>,
    last_refresh: Option<Instant>,
    generation: u64,
}

impl SessionState {
    fn needs_login(&self, refresh_interval: Option<Duration>) -> bool {
        match (&self.jar, self.last_refresh, refresh_interval) {
            (None, _, _) => true,
            (Some(_), Some(stamp), Some(interval)) => stamp.elapsed() >= interval,
            _ => false,
        }
    }
}

/// Cookie-based session credentials.
pub struct CookieAuth {
    session_url: String,
    username: String,
    password: String,
    refresh_interval: Option<Duration>,
    state: Mutex<SessionState>,
}

impl CookieAuth {
    /// Create an unauthenticated provider. No request is made until the
    /// first call goes out.
    pub fn new(session_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            session_url: session_url.into(),
            username: username.into(),
            password: password.into(),
            refresh_interval: Some(DEFAULT_SESSION_REFRESH),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Force a new login once the session is older than `interval`.
    /// `None` keeps a session until the server rejects it.
    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// How many logins have succeeded so far.
    pub async fn session_generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Drop the current session; the next request logs in again.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.jar = None;
        state.last_refresh = None;
    }

    #[instrument(skip_all, fields(url = %self.session_url))]
    async fn login(&self, state: &mut SessionState, sender: &dyn HttpSender) -> Result<()> {
        debug!(username = %self.username, "Logging in");

        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let request = PreparedRequest {
            method: Method::POST,
            url: self.session_url.clone(),
            headers,
            query: Vec::new(),
            body: Some(serde_json::to_vec(&body).map_err(|e| ApiError::Encode(e.to_string()))?),
        };

        let response = sender
            .send(&request)
            .await
            .map_err(|source| ApiError::LoginUnreachable {
                url: self.session_url.clone(),
                source,
            })?;

        if !response.status.is_success() {
            let message = classify::extract_error_message(&response);
            warn!(status = %response.status, "Session login rejected");
            return Err(ApiError::LoginFailed {
                status: response.status.as_u16(),
                message,
            });
        }

        let jar = session_cookies(&response);
        if jar.is_empty() {
            return Err(ApiError::LoginFailed {
                status: response.status.as_u16(),
                message: "session endpoint returned no cookies".to_string(),
            });
        }

        info!(cookies = jar.len(), "Session established");
        state.jar = Some(jar);
        state.last_refresh = Some(Instant::now());
        state.generation += 1;
        Ok(())
    }
}

impl fmt::Debug for CookieAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieAuth")
            .field("session_url", &self.session_url)
            .field("username", &self.username)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for CookieAuth {
    async fn attach(&self, request: &mut PreparedRequest, sender: &dyn HttpSender) -> Result<u64> {
        let mut state = self.state.lock().await;
        if state.needs_login(self.refresh_interval) {
            self.login(&mut state, sender).await?;
        }

        // Stale cookies must not ride along with the fresh jar.
        request.headers.remove(header::COOKIE);
        if let Some(jar) = &state.jar {
            let mut value = HeaderValue::from_str(&jar.header_value())
                .map_err(|_| ApiError::InvalidCredential("session cookie is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            request.headers.insert(header::COOKIE, value);
        }
        if !request.headers.contains_key(ATLASSIAN_TOKEN) {
            request
                .headers
                .insert(ATLASSIAN_TOKEN, HeaderValue::from_static("no-check"));
        }

        Ok(state.generation)
    }

    fn can_reauthenticate(&self) -> bool {
        true
    }

    async fn reauthenticate(&self, sender: &dyn HttpSender, stale_generation: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.generation != stale_generation {
            debug!(
                stale_generation,
                current_generation = state.generation,
                "Session already refreshed by another request"
            );
            return Ok(());
        }
        state.jar = None;
        self.login(&mut state, sender).await
    }
}

/// Collect the cookies a login response hands out.
///
/// `Set-Cookie` headers win; servers that only describe the session in the
/// JSON body (`{"session": {"name", "value"}}`) are handled as a fallback.
fn session_cookies(response: &RawResponse) -> CookieJar {
    let mut jar = BTreeMap::new();
    for value in response.headers.get_all(header::SET_COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let pair = value.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                jar.insert(name.to_string(), value.trim().to_string());
            }
        }
    }

    if jar.is_empty() {
        if let Ok(body) = response.json() {
            let session = &body["session"];
            if let (Some(name), Some(value)) = (session["name"].as_str(), session["value"].as_str()) {
                jar.insert(name.to_string(), value.to_string());
            }
        }
    }

    CookieJar(jar)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;
    use wiremock::matchers::{body_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::retry::RetryPolicy;
    use crate::api::transport::{ReqwestSender, Request, ResilientTransport};

    const SESSION_PATH: &str = "/rest/auth/1/session";

    fn transport(auth: Arc<CookieAuth>) -> ResilientTransport {
        let sender = ReqwestSender::new(Duration::from_secs(5)).unwrap();
        ResilientTransport::new(Arc::new(sender), auth).with_policy(RetryPolicy::new(0))
    }

    fn auth(server: &MockServer) -> Arc<CookieAuth> {
        Arc::new(CookieAuth::new(
            format!("{}{}", server.uri(), SESSION_PATH),
            "admin",
            "s3cret",
        ))
    }

    fn login_response(session: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("Set-Cookie", format!("JSESSIONID={}; Path=/; HttpOnly", session).as_str())
            .set_body_json(serde_json::json!({"session": {"name": "JSESSIONID", "value": session}}))
    }

    #[test]
    fn test_session_cookies_from_headers() {
        let response = RawResponse::new(StatusCode::OK, Vec::new())
            .with_header("Set-Cookie", "JSESSIONID=abc; Path=/")
            .with_header("Set-Cookie", "atlassian.xsrf.token=xyz; Path=/; Secure");
        let jar = session_cookies(&response);
        assert_eq!(jar.header_value(), "JSESSIONID=abc; atlassian.xsrf.token=xyz");
    }

    #[test]
    fn test_session_cookies_from_body() {
        let response = RawResponse::new(
            StatusCode::OK,
            br#"{"session": {"name": "JSESSIONID", "value": "abc"}}"#.to_vec(),
        );
        assert_eq!(session_cookies(&response).header_value(), "JSESSIONID=abc");
    }

    #[test]
    fn test_needs_login() {
        let mut state = SessionState::default();
        assert!(state.needs_login(None));

        state.jar = Some(CookieJar(BTreeMap::from([("a".to_string(), "b".to_string())])));
        state.last_refresh = Some(Instant::now());
        assert!(!state.needs_login(None));
        assert!(!state.needs_login(Some(Duration::from_secs(3600))));
        assert!(state.needs_login(Some(Duration::ZERO)));
    }

    #[test]
    fn test_debug_hides_password() {
        let auth = CookieAuth::new("http://jira.test/rest/auth/1/session", "admin", "s3cret");
        let debug = format!("{:?}", auth);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_first_request_logs_in_and_sends_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .and(body_json(serde_json::json!({"username": "admin", "password": "s3cret"})))
            .respond_with(login_response("first"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/myself"))
            .and(header_eq("cookie", "JSESSIONID=first"))
            .and(header_eq("x-atlassian-token", "no-check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "admin"})))
            .expect(2)
            .mount(&server)
            .await;

        let auth = auth(&server);
        let transport = transport(auth.clone());
        let url = format!("{}/rest/api/2/myself", server.uri());

        transport.execute(Request::get(&url)).await.unwrap();
        transport.execute(Request::get(&url)).await.unwrap();

        assert_eq!(auth.session_generation().await, 1);
    }

    #[tokio::test]
    async fn test_stale_cookie_header_is_replaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(login_response("fresh"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/myself"))
            .and(header_eq("cookie", "JSESSIONID=fresh"))
            .and(|req: &wiremock::Request| req.headers.get_all("cookie").iter().count() == 1)
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "admin"})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(auth(&server));
        let request = Request::get(format!("{}/rest/api/2/myself", server.uri()))
            .header(header::COOKIE, HeaderValue::from_static("JSESSIONID=stale"));

        let response = transport.execute(request).await.unwrap();
        assert_eq!(response.json().unwrap()["name"], "admin");
    }

    #[test]
    fn test_sessions_refresh_every_five_minutes_by_default() {
        let auth = CookieAuth::new("http://jira.test/rest/auth/1/session", "admin", "s3cret");
        assert_eq!(auth.refresh_interval, Some(Duration::from_secs(300)));
        assert_eq!(auth.with_refresh_interval(None).refresh_interval, None);
    }

    #[tokio::test]
    async fn test_aged_session_logs_in_again_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(login_response("abc"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/myself"))
            .and(header_eq("cookie", "JSESSIONID=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(2)
            .mount(&server)
            .await;

        let auth = Arc::new(
            CookieAuth::new(format!("{}{}", server.uri(), SESSION_PATH), "admin", "s3cret")
                .with_refresh_interval(Some(Duration::ZERO)),
        );
        let transport = transport(auth.clone());
        let url = format!("{}/rest/api/2/myself", server.uri());

        transport.execute(Request::get(&url)).await.unwrap();
        transport.execute(Request::get(&url)).await.unwrap();

        assert_eq!(auth.session_generation().await, 2);
    }

    #[tokio::test]
    async fn test_expired_session_relogs_once_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(login_response("first"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(login_response("second"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/myself"))
            .and(header_eq("cookie", "JSESSIONID=second"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "admin"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/myself"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let auth = auth(&server);
        let transport = transport(auth.clone());

        let response = transport
            .execute(Request::get(format!("{}/rest/api/2/myself", server.uri())))
            .await
            .unwrap();

        assert_eq!(response.json().unwrap()["name"], "admin");
        assert_eq!(auth.session_generation().await, 2);
    }

    #[tokio::test]
    async fn test_repeated_401_is_fatal_without_second_relogin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(login_response("abc"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/myself"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let transport = transport(auth(&server));
        let err = transport
            .execute(Request::get(format!("{}/rest/api/2/myself", server.uri())))
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_relogin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(login_response("first"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(login_response("second"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header_eq("cookie", "JSESSIONID=second"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let auth = auth(&server);
        let transport = Arc::new(transport(auth.clone()));
        let mut handles = Vec::new();
        for n in 0..5 {
            let transport = transport.clone();
            let url = format!("{}/rest/api/2/issue/PROJ-{}", server.uri(), n);
            handles.push(tokio::spawn(async move {
                transport.execute(Request::get(url)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // One initial login plus a single shared refresh.
        assert_eq!(auth.session_generation().await, 2);
    }

    #[tokio::test]
    async fn test_rejected_login_reports_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SESSION_PATH))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("X-Authentication-Denied-Reason", "CAPTCHA_CHALLENGE"),
            )
            .mount(&server)
            .await;

        let transport = transport(auth(&server));
        let err = transport
            .execute(Request::get(format!("{}/rest/api/2/myself", server.uri())))
            .await
            .unwrap_err();

        match err {
            ApiError::LoginFailed { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "CAPTCHA_CHALLENGE");
            }
            other => panic!("Expected LoginFailed, got {:?}", other),
        }
    }
}
