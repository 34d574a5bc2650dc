//! JIRA API client implementation.
//!
//! [`JiraClient`] wires the options, the credential and the resilient
//! transport together and exposes the common operations on top of the
//! endpoint catalog. Every call goes through the same transport, so retries,
//! session refresh and logging behave identically for all of them.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::auth::{BasicAuth, CredentialProvider};
use super::cookie::CookieAuth;
use super::endpoint::{ApiUrls, Endpoint};
use super::error::{ApiError, Result};
use super::fields::FieldAliases;
use super::pagination::{FetchMode, PageQuery, PaginatedFetcher, ResultList};
use super::registry::{ResourceKind, ResourceRegistry};
use super::resource::{Resource, ResourceContext};
use super::retry::RetryPolicy;
use super::transport::{HttpSender, ReqwestSender, Request, ResilientTransport};
use crate::config::ClientOptions;

/// The JIRA API client.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct JiraClient {
    options: ClientOptions,
    ctx: Arc<ResourceContext>,
    fetch_mode: FetchMode,
    link_types: Mutex<Option<Arc<Vec<Resource>>>>,
}

impl JiraClient {
    /// Create a client sending through `reqwest`.
    ///
    /// Does NOT validate the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or the HTTP client cannot
    /// be built.
    pub fn new(options: ClientOptions, credential: Arc<dyn CredentialProvider>) -> Result<Self> {
        let sender = Arc::new(ReqwestSender::new(options.timeout())?);
        Self::with_sender(options, sender, credential)
    }

    /// Create a client over an arbitrary sender.
    pub fn with_sender(
        mut options: ClientOptions,
        sender: Arc<dyn HttpSender>,
        credential: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        options.server = normalize_base_url(&options.server);
        options
            .validate()
            .map_err(|e| ApiError::InvalidOptions(e.to_string()))?;

        let policy = RetryPolicy::new(options.max_retries)
            .with_base_delay(options.retry_base_delay())
            .with_max_delay(options.max_retry_delay());
        let transport = ResilientTransport::new(sender, credential)
            .with_policy(policy)
            .with_default_headers(default_headers(&options)?)
            .with_confidential_logging(options.confidential_logging);

        let ctx = Arc::new(
            ResourceContext::new(Arc::new(transport), ApiUrls::from_options(&options))
                .with_delay_reload(options.delay_reload()),
        );
        let fetch_mode = if options.concurrent_fetch {
            FetchMode::Concurrent {
                workers: options.async_workers,
            }
        } else {
            FetchMode::Sequential
        };

        Ok(Self {
            options,
            ctx,
            fetch_mode,
            link_types: Mutex::new(None),
        })
    }

    /// Create a client with basic credentials and default options.
    pub fn with_credentials(server: &str, username: &str, token: &str) -> Result<Self> {
        Self::new(ClientOptions::new(server), Arc::new(BasicAuth::new(username, token)))
    }

    /// Create a client that logs in to the cookie session endpoint on first
    /// use.
    pub fn with_cookie_auth(options: ClientOptions, username: &str, password: &str) -> Result<Self> {
        let server = normalize_base_url(&options.server);
        let session_url = ClientOptions {
            server,
            ..options.clone()
        }
        .session_url();
        let auth = CookieAuth::new(session_url, username, password)
            .with_refresh_interval(options.session_refresh());
        Self::new(options, Arc::new(auth))
    }

    /// Create a client and check that the server accepts the credential.
    ///
    /// Loads field aliases as well when `display_name_aliases` is on.
    #[instrument(skip_all, fields(server = %options.server))]
    pub async fn connect(options: ClientOptions, credential: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = Self::new(options, credential)?;

        client.validate_connection().await?;
        if client.options.display_name_aliases {
            client.load_field_aliases().await?;
        }

        info!("JIRA client created and connection validated");
        Ok(client)
    }

    /// Replace the URL-to-kind registry.
    ///
    /// Must be called before any resource is materialized.
    pub fn with_registry(mut self, registry: ResourceRegistry) -> Self {
        match Arc::get_mut(&mut self.ctx) {
            Some(ctx) => ctx.set_registry(registry),
            None => warn!("Registry not replaced: resources already share this client's context"),
        }
        self
    }

    /// Validate the connection by fetching the authenticated user.
    #[instrument(skip(self))]
    pub async fn validate_connection(&self) -> Result<Resource> {
        debug!("Validating JIRA connection");

        let user = self.myself().await.map_err(|e| {
            error!("Connection validation failed: {}", e);
            e
        })?;

        info!("Connected as user: {}", user);
        Ok(user)
    }

    /// The authenticated user.
    pub async fn myself(&self) -> Result<Resource> {
        let raw = self.get_endpoint(&Endpoint::MYSELF, &[], &[]).await?;
        Resource::from_raw(&self.ctx, Some(Endpoint::MYSELF.item_kind), raw)
    }

    /// Server version and deployment details, as returned.
    pub async fn server_info(&self) -> Result<Value> {
        self.get_endpoint(&Endpoint::SERVER_INFO, &[], &[]).await
    }

    /// Fetch a resource by kind and ids.
    pub async fn find(&self, kind: ResourceKind, ids: &[&str]) -> Result<Resource> {
        Resource::find(&self.ctx, kind, ids, &[]).await
    }

    /// Fetch one issue by key or id.
    #[instrument(skip(self), fields(issue_key = %key))]
    pub async fn issue(&self, key: &str) -> Result<Resource> {
        let issue = self.find(ResourceKind::Issue, &[key]).await?;
        debug!("Fetched issue: {}", issue);
        Ok(issue)
    }

    /// Materialize a payload, picking the kind from its `self` link.
    pub fn materialize(&self, raw: Value) -> Result<Resource> {
        Resource::from_raw(&self.ctx, None, raw)
    }

    /// Fetch a paged endpoint.
    ///
    /// `page_size` of `None` or zero fetches every page, requesting the
    /// per-kind default batch size.
    pub async fn fetch_pages(
        &self,
        endpoint: &Endpoint,
        ids: &[&str],
        start_at: u64,
        page_size: Option<u32>,
        params: &[(String, String)],
    ) -> Result<ResultList<Resource>> {
        if endpoint.method != Method::GET {
            return Err(ApiError::InvalidOptions(format!(
                "paged endpoint '{}' must use GET, not {}",
                endpoint.path, endpoint.method
            )));
        }
        let url = self.ctx.urls().endpoint_url(endpoint, ids)?;
        let mut query = PageQuery::new(url, endpoint.item_kind)
            .start_at(start_at)
            .page_size(page_size)
            .batch_size(self.options.batch_size_for(endpoint.item_kind.name()));
        if let Some(key) = endpoint.items_key {
            query = query.items_key(key);
        }
        query.params.extend(params.iter().cloned());

        PaginatedFetcher::new(Arc::clone(&self.ctx))
            .with_mode(self.fetch_mode)
            .fetch(&query)
            .await
    }

    /// Search issues with JQL.
    ///
    /// An empty `fields` slice returns the server's default field set.
    #[instrument(skip(self, jql, fields), fields(jql = %jql))]
    pub async fn search_issues(
        &self,
        jql: &str,
        start_at: u64,
        page_size: Option<u32>,
        fields: &[&str],
    ) -> Result<ResultList<Resource>> {
        let mut params = vec![("jql".to_string(), jql.to_string())];
        if !fields.is_empty() {
            params.push(("fields".to_string(), fields.join(",")));
        }

        let issues = self
            .fetch_pages(&Endpoint::SEARCH, &[], start_at, page_size, &params)
            .await?;
        debug!("Found {} issues (total: {})", issues.len(), issues.total);
        Ok(issues)
    }

    /// Every project visible to the user.
    pub async fn projects(&self) -> Result<ResultList<Resource>> {
        self.fetch_pages(&Endpoint::PROJECTS, &[], 0, None, &[]).await
    }

    /// Comments on an issue.
    pub async fn comments(&self, issue_key: &str) -> Result<ResultList<Resource>> {
        self.fetch_pages(&Endpoint::COMMENTS, &[issue_key], 0, None, &[])
            .await
    }

    /// Users matching `query` by name or email.
    pub async fn search_users(&self, query: &str, page_size: Option<u32>) -> Result<ResultList<Resource>> {
        let params = [("username".to_string(), query.to_string())];
        self.fetch_pages(&Endpoint::USER_SEARCH, &[], 0, page_size, &params)
            .await
    }

    /// Agile boards.
    pub async fn boards(&self, page_size: Option<u32>) -> Result<ResultList<Resource>> {
        self.fetch_pages(&Endpoint::BOARDS, &[], 0, page_size, &[]).await
    }

    /// Sprints of a board.
    pub async fn sprints(&self, board_id: &str, page_size: Option<u32>) -> Result<ResultList<Resource>> {
        self.fetch_pages(&Endpoint::SPRINTS, &[board_id], 0, page_size, &[])
            .await
    }

    /// Every field definition, system and custom.
    pub async fn fields(&self) -> Result<Vec<Value>> {
        match self.get_endpoint(&Endpoint::FIELDS, &[], &[]).await? {
            Value::Array(fields) => Ok(fields),
            other => Err(ApiError::materialization("expected an array of fields", &other)),
        }
    }

    /// Load custom field aliases; issues fetched afterwards carry them.
    #[instrument(skip(self))]
    pub async fn load_field_aliases(&self) -> Result<Arc<FieldAliases>> {
        let aliases = Arc::new(FieldAliases::from_fields(&self.fields().await?));
        info!(aliases = aliases.len(), "Loaded field aliases");
        self.ctx.set_field_aliases(Some(Arc::clone(&aliases)));
        Ok(aliases)
    }

    /// Drop the loaded field aliases.
    pub fn invalidate_field_cache(&self) {
        debug!("Invalidating field alias cache");
        self.ctx.set_field_aliases(None);
    }

    /// Issue link types, cached after the first call. `force` refetches.
    pub async fn issue_link_types(&self, force: bool) -> Result<Arc<Vec<Resource>>> {
        let mut cached = self.link_types.lock().await;
        if !force {
            if let Some(types) = cached.as_ref() {
                return Ok(Arc::clone(types));
            }
        }

        let types = Arc::new(
            self.fetch_pages(&Endpoint::ISSUE_LINK_TYPES, &[], 0, None, &[])
                .await?
                .into_items(),
        );
        debug!(count = types.len(), "Fetched issue link types");
        *cached = Some(Arc::clone(&types));
        Ok(types)
    }

    /// The base URL for the JIRA instance.
    pub fn base_url(&self) -> &str {
        self.ctx.urls().server()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn context(&self) -> &Arc<ResourceContext> {
        &self.ctx
    }

    pub fn transport(&self) -> &ResilientTransport {
        self.ctx.transport()
    }

    async fn get_endpoint(&self, endpoint: &Endpoint, ids: &[&str], params: &[(String, String)]) -> Result<Value> {
        let url = self.ctx.urls().endpoint_url(endpoint, ids)?;
        let request = Request::new(endpoint.method.clone(), url).query_pairs(params);
        self.ctx.transport().execute(request).await?.json()
    }
}

fn default_headers(options: &ClientOptions) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::InvalidOptions(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ApiError::InvalidOptions(format!("invalid value for header '{}'", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Normalize the base URL by removing trailing slashes.
fn normalize_base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');

    // Warn if not HTTPS (but don't enforce for localhost/testing)
    if !url.starts_with("https://") && !url.contains("localhost") && !url.contains("127.0.0.1") {
        warn!("URL does not use HTTPS: {}. This is insecure for production use.", url);
    }

    url.to_string()
}
