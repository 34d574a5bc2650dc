//! Endpoint descriptors and URL construction.
//!
//! An [`Endpoint`] binds a logical operation to a path template, a verb, and
//! the shape of its response. Adding an endpoint needs no changes elsewhere.

use reqwest::Method;

use super::error::{ApiError, Result};
use super::registry::ResourceKind;
use crate::config::ClientOptions;

/// Which REST API a path lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiBase {
    /// `/rest/api/<version>`
    Core,
    /// `/rest/agile/<version>`
    Agile,
}

/// Static metadata for one operation.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Path relative to the API base, with `{0}`, `{1}` placeholders.
    pub path: &'static str,
    pub method: Method,
    pub base: ApiBase,
    /// Kind of the returned items.
    pub item_kind: ResourceKind,
    /// Key of the item array in a paged envelope; `None` for bare arrays and
    /// single objects.
    pub items_key: Option<&'static str>,
}

impl Endpoint {
    const fn get(path: &'static str, base: ApiBase, item_kind: ResourceKind, items_key: Option<&'static str>) -> Self {
        Self {
            path,
            method: Method::GET,
            base,
            item_kind,
            items_key,
        }
    }

    /// JQL issue search.
    pub const SEARCH: Endpoint = Endpoint::get("search", ApiBase::Core, ResourceKind::Issue, Some("issues"));
    /// Every field, system and custom.
    pub const FIELDS: Endpoint = Endpoint::get("field", ApiBase::Core, ResourceKind::Unknown, None);
    pub const PROJECTS: Endpoint = Endpoint::get("project", ApiBase::Core, ResourceKind::Project, None);
    pub const ISSUE_LINK_TYPES: Endpoint = Endpoint::get(
        "issueLinkType",
        ApiBase::Core,
        ResourceKind::IssueLinkType,
        Some("issueLinkTypes"),
    );
    pub const USER_SEARCH: Endpoint = Endpoint::get("user/search", ApiBase::Core, ResourceKind::User, None);
    /// Comments on issue `{0}`.
    pub const COMMENTS: Endpoint =
        Endpoint::get("issue/{0}/comment", ApiBase::Core, ResourceKind::Comment, Some("comments"));
    pub const BOARDS: Endpoint = Endpoint::get("board", ApiBase::Agile, ResourceKind::Board, Some("values"));
    /// Sprints of board `{0}`.
    pub const SPRINTS: Endpoint =
        Endpoint::get("board/{0}/sprint", ApiBase::Agile, ResourceKind::Sprint, Some("values"));
    /// The authenticated user.
    pub const MYSELF: Endpoint = Endpoint::get("myself", ApiBase::Core, ResourceKind::User, None);
    pub const SERVER_INFO: Endpoint = Endpoint::get("serverInfo", ApiBase::Core, ResourceKind::Unknown, None);
}

/// Base URLs for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiUrls {
    server: String,
    core: String,
    agile: String,
}

impl ApiUrls {
    pub fn from_options(options: &ClientOptions) -> Self {
        let server = options.server.trim_end_matches('/').to_string();
        Self {
            core: format!("{}/rest/{}/{}", server, options.rest_path, options.rest_api_version),
            agile: format!(
                "{}/rest/{}/{}",
                server, options.agile_rest_path, options.agile_rest_api_version
            ),
            server,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// The base URL of `base`, without a trailing slash.
    pub fn base(&self, base: ApiBase) -> &str {
        match base {
            ApiBase::Core => &self.core,
            ApiBase::Agile => &self.agile,
        }
    }

    /// An absolute URL for `path` under `base`.
    pub fn url(&self, base: ApiBase, path: &str) -> String {
        format!("{}/{}", self.base(base), path.trim_start_matches('/'))
    }

    /// The absolute URL of `endpoint` with `ids` filled in.
    pub fn endpoint_url(&self, endpoint: &Endpoint, ids: &[&str]) -> Result<String> {
        Ok(self.url(endpoint.base, &format_template(endpoint.path, ids)?))
    }
}

/// Fill positional placeholders, percent-encoding each id.
///
/// Placeholders without a matching id are an error, extra ids are ignored.
pub fn format_template(template: &str, ids: &[&str]) -> Result<String> {
    let mut path = template.to_string();
    for (index, id) in ids.iter().enumerate() {
        path = path.replace(&format!("{{{}}}", index), &urlencoding::encode(id));
    }

    if let Some(start) = path.find('{') {
        if path[start..].contains('}') {
            return Err(ApiError::InvalidUrl(format!(
                "template '{}' needs more than {} id(s)",
                template,
                ids.len()
            )));
        }
    }
    Ok(path)
}
