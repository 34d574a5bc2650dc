//! Paged collection fetching.
//!
//! [`PaginatedFetcher`] turns a paged endpoint into one ordered
//! [`ResultList`]. With a page size it fetches a single page; without one it
//! keeps going until the server says it is done, either page by page or by
//! dispatching every remaining page at once to a bounded worker pool.

use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use super::error::{ApiError, Result};
use super::registry::ResourceKind;
use super::resource::{Resource, ResourceContext};

/// Default concurrent page requests.
pub const DEFAULT_ASYNC_WORKERS: usize = 5;

/// An ordered collection plus the paging metadata the server reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultList<T> {
    items: Vec<T>,
    /// Index of the first item.
    pub start_at: u64,
    /// Page size the server used.
    pub max_results: u64,
    /// Total matches. Falls back to the item count when not reported.
    pub total: u64,
    /// Whether the server flagged the (first) page as the last one.
    pub is_last: Option<bool>,
}

impl<T> ResultList<T> {
    pub fn new(items: Vec<T>, start_at: u64, max_results: u64, total: Option<u64>, is_last: Option<bool>) -> Self {
        let total = total.unwrap_or(items.len() as u64);
        Self {
            items,
            start_at,
            max_results,
            total,
            is_last,
        }
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> Deref for ResultList<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> IntoIterator for ResultList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a ResultList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// What to fetch.
#[derive(Debug, Clone)]
pub struct PageQuery {
    pub url: String,
    pub kind: ResourceKind,
    /// Envelope key holding the items; `None` when the response is a bare
    /// array.
    pub items_key: Option<String>,
    pub start_at: u64,
    /// Page size. `None` or zero fetches everything.
    pub page_size: Option<u32>,
    /// Page size to request when fetching everything. The server's own
    /// default applies when unset.
    pub batch_size: Option<u32>,
    /// Extra query parameters sent with every page.
    pub params: Vec<(String, String)>,
}

impl PageQuery {
    pub fn new(url: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
            items_key: None,
            start_at: 0,
            page_size: None,
            batch_size: None,
            params: Vec::new(),
        }
    }

    pub fn items_key(mut self, key: impl Into<String>) -> Self {
        self.items_key = Some(key.into());
        self
    }

    pub fn start_at(mut self, start_at: u64) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn batch_size(mut self, batch_size: Option<u32>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    fn page_params(&self, start_at: u64, max_results: Option<u64>) -> Vec<(String, String)> {
        let mut params = self.params.clone();
        params.push(("startAt".to_string(), start_at.to_string()));
        if let Some(max) = max_results {
            params.push(("maxResults".to_string(), max.to_string()));
        }
        params
    }
}

/// One page, split into items and metadata.
#[derive(Debug, Default)]
struct Page {
    items: Vec<Value>,
    start_at: Option<u64>,
    max_results: Option<u64>,
    total: Option<u64>,
    is_last: Option<bool>,
}

impl Page {
    /// Whether the server reported any paging metadata. Envelopes without
    /// it hold the whole collection.
    fn is_paged(&self) -> bool {
        self.max_results.is_some() || self.total.is_some() || self.is_last.is_some()
    }

    /// Split a page response.
    ///
    /// `null` and `{}` are empty pages. An envelope without `items_key` is
    /// an error carrying the payload.
    fn parse(raw: Value, items_key: Option<&str>) -> Result<Self> {
        match raw {
            Value::Null => Ok(Page::default()),
            Value::Object(map) if map.is_empty() => Ok(Page::default()),
            Value::Array(items) => Ok(Page {
                items,
                is_last: Some(true),
                ..Default::default()
            }),
            Value::Object(mut map) => {
                let Some(key) = items_key else {
                    return Err(ApiError::materialization(
                        "expected an array of items",
                        &Value::Object(map),
                    ));
                };
                let items = match map.remove(key) {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) => Vec::new(),
                    Some(other) => {
                        map.insert(key.to_string(), other);
                        return Err(ApiError::materialization(
                            format!("key '{}' is not an array", key),
                            &Value::Object(map),
                        ));
                    }
                    None => {
                        return Err(ApiError::materialization(
                            format!("missing key '{}'", key),
                            &Value::Object(map),
                        ))
                    }
                };
                Ok(Page {
                    items,
                    start_at: map.get("startAt").and_then(Value::as_u64),
                    max_results: map.get("maxResults").and_then(Value::as_u64),
                    total: map.get("total").and_then(Value::as_u64),
                    is_last: map.get("isLast").and_then(Value::as_bool),
                })
            }
            other => Err(ApiError::materialization("unexpected page shape", &other)),
        }
    }
}

/// How the remaining pages are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Sequential,
    /// All remaining pages at once, at most `workers` in flight.
    Concurrent { workers: usize },
}

/// Fetches paged collections through a resource context.
#[derive(Debug, Clone)]
pub struct PaginatedFetcher {
    ctx: Arc<ResourceContext>,
    mode: FetchMode,
}

impl PaginatedFetcher {
    pub fn new(ctx: Arc<ResourceContext>) -> Self {
        Self {
            ctx,
            mode: FetchMode::Sequential,
        }
    }

    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Fetch the items `query` describes.
    ///
    /// Items keep the server's order, and pages keep their order even when
    /// fetched concurrently. A failing page aborts the whole fetch.
    #[instrument(skip_all, fields(kind = %query.kind, url = %query.url))]
    pub async fn fetch(&self, query: &PageQuery) -> Result<ResultList<Resource>> {
        let requested = query.page_size.filter(|size| *size > 0);
        let first_size = requested.or(query.batch_size).map(u64::from);
        let items_key = query.items_key.as_deref();

        let raw = self
            .ctx
            .transport()
            .get_json(&query.url, &query.page_params(query.start_at, first_size))
            .await?;
        let mut first = Page::parse(raw, items_key)?;
        let mut items = self.materialize(query.kind, std::mem::take(&mut first.items))?;
        debug!(items = items.len(), total = ?first.total, "Fetched first page");

        let start_at = first.start_at.unwrap_or(query.start_at);
        let stride = first
            .max_results
            .filter(|max| *max > 0)
            .unwrap_or(items.len() as u64);

        if requested.is_none() && first.is_paged() && stride > 0 {
            if let Some(batch) = first_size {
                if stride < batch {
                    warn!(
                        requested = batch,
                        received = stride,
                        "Server capped the page size, continuing with its size"
                    );
                }
            }

            let next_start = start_at + stride;
            let last_len = items.len() as u64;
            let more = first.is_last != Some(true);

            match (self.mode, first.total) {
                (FetchMode::Concurrent { workers }, Some(total)) if more && (items.len() as u64) < total => {
                    let rest = self.fetch_concurrent(query, next_start, stride, total, workers).await?;
                    items.extend(rest);
                }
                _ if more => {
                    let rest = self
                        .fetch_sequential(query, next_start, stride, first.total, last_len)
                        .await?;
                    items.extend(rest);
                }
                _ => {}
            }
        }

        let max_results = first.max_results.unwrap_or(stride);
        Ok(ResultList::new(items, start_at, max_results, first.total, first.is_last))
    }

    async fn fetch_sequential(
        &self,
        query: &PageQuery,
        mut start: u64,
        stride: u64,
        total: Option<u64>,
        mut last_len: u64,
    ) -> Result<Vec<Resource>> {
        let mut items = Vec::new();
        let mut is_last = false;

        while !is_last && total.map_or(true, |total| start < total) && last_len == stride {
            let raw = self
                .ctx
                .transport()
                .get_json(&query.url, &query.page_params(start, Some(stride)))
                .await?;
            let page = Page::parse(raw, query.items_key.as_deref())?;
            if page.items.is_empty() {
                debug!(start, "Empty page, stopping");
                break;
            }

            last_len = page.items.len() as u64;
            is_last = page.is_last == Some(true);
            items.extend(self.materialize(query.kind, page.items)?);
            debug!(start, items = last_len, "Fetched page");
            start += stride;
        }

        Ok(items)
    }

    async fn fetch_concurrent(
        &self,
        query: &PageQuery,
        next_start: u64,
        stride: u64,
        total: u64,
        workers: usize,
    ) -> Result<Vec<Resource>> {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut handles = Vec::new();

        let mut start = next_start;
        let mut index = 0usize;
        while start < total {
            let semaphore = Arc::clone(&semaphore);
            let ctx = Arc::clone(&self.ctx);
            let url = query.url.clone();
            let params = query.page_params(start, Some(stride));
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ApiError::Worker(e.to_string()))?;
                let raw = ctx.transport().get_json(&url, &params).await?;
                Ok::<_, ApiError>((index, raw))
            }));
            start += stride;
            index += 1;
        }
        debug!(pages = handles.len(), workers, "Dispatched remaining pages");

        let mut pages = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            let page = joined.map_err(|e| ApiError::Worker(e.to_string()))??;
            pages.push(page);
        }
        pages.sort_by_key(|(index, _)| *index);

        let mut items = Vec::new();
        for (_, raw) in pages {
            let page = Page::parse(raw, query.items_key.as_deref())?;
            items.extend(self.materialize(query.kind, page.items)?);
        }
        Ok(items)
    }

    fn materialize(&self, kind: ResourceKind, raw_items: Vec<Value>) -> Result<Vec<Resource>> {
        raw_items
            .into_iter()
            .map(|raw| Resource::from_raw(&self.ctx, Some(kind), raw))
            .collect()
    }
}
