//! Dynamic resource materialization.
//!
//! JSON responses are turned into a tree of [`Attribute`]s. Any nested
//! object carrying a `self` link becomes a [`Resource`] whose kind is chosen
//! by the context's [`ResourceRegistry`]; other objects become
//! [`PropertyHolder`]s. The tree owns its data: editing it never touches the
//! raw payload a resource was built from.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::endpoint::{format_template, ApiUrls};
use super::error::{ApiError, Result};
use super::fields::FieldAliases;
use super::registry::{ResourceKind, ResourceRegistry};
use super::transport::{Request, ResilientTransport};

/// Keys most likely to hold something a person would recognize, in order.
const READABLE_IDS: &[&str] = &[
    "displayName",
    "key",
    "name",
    "accountId",
    "filename",
    "value",
    "scope",
    "votes",
    "id",
    "mimeType",
    "closed",
];

/// Read access shared by everything that has named attributes.
pub trait Attributes {
    /// Look up an attribute by name or alias.
    fn get(&self, name: &str) -> Option<&Attribute>;

    /// The attributes as JSON. Aliases are not included.
    fn to_raw(&self) -> Value;

    /// Canonical names followed by alias names.
    fn attribute_names(&self) -> Vec<String>;

    /// Follow a dotted path such as `fields.status.name`. List elements are
    /// addressed by index.
    fn path(&self, dotted: &str) -> Option<&Attribute> {
        let mut parts = dotted.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }
}

/// One node of a materialized tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Attribute>),
    Holder(PropertyHolder),
    Resource(Box<Resource>),
}

impl Attribute {
    /// Convert JSON without resource dispatch; objects become holders.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut holder = PropertyHolder::new();
                for (key, value) in map {
                    holder.insert(key, Attribute::from_json(value));
                }
                Attribute::Holder(holder)
            }
            Value::Array(items) => Attribute::List(items.into_iter().map(Attribute::from_json).collect()),
            scalar => Attribute::from_scalar(&scalar),
        }
    }

    fn from_scalar(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Attribute::Bool(*b),
            Value::Number(n) => Attribute::Number(n.clone()),
            Value::String(s) => Attribute::String(s.clone()),
            _ => Attribute::Null,
        }
    }

    /// Child attribute of a holder or resource, or list element by index.
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        match self {
            Attribute::Holder(holder) => holder.get(name),
            Attribute::Resource(resource) => resource.get(name),
            Attribute::List(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    pub fn to_raw(&self) -> Value {
        match self {
            Attribute::Null => Value::Null,
            Attribute::Bool(b) => Value::Bool(*b),
            Attribute::Number(n) => Value::Number(n.clone()),
            Attribute::String(s) => Value::String(s.clone()),
            Attribute::List(items) => Value::Array(items.iter().map(Attribute::to_raw).collect()),
            Attribute::Holder(holder) => holder.to_raw(),
            Attribute::Resource(resource) => resource.to_raw(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Attribute::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Attribute::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Attribute::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_holder(&self) -> Option<&PropertyHolder> {
        match self {
            Attribute::Holder(holder) => Some(holder),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Attribute::Resource(resource) => Some(resource.as_ref()),
            _ => None,
        }
    }
}

/// An object without a `self` link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyHolder {
    attrs: BTreeMap<String, Attribute>,
    /// Alias name to canonical name.
    aliases: BTreeMap<String, String>,
}

impl PropertyHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a canonical attribute, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Attribute) -> Option<Attribute> {
        let name = name.into();
        self.aliases.remove(&name);
        self.attrs.insert(name, value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Attribute> {
        self.aliases.retain(|_, canonical| canonical.as_str() != name);
        self.attrs.remove(name)
    }

    /// Whether `name` is a canonical attribute.
    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Mutable access to a canonical attribute or the target of an alias.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        let canonical = match self.aliases.get(name) {
            Some(target) if !self.attrs.contains_key(name) => target.clone(),
            _ => name.to_string(),
        };
        self.attrs.get_mut(&canonical)
    }

    /// Expose `canonical` under a second name.
    ///
    /// Refused when `alias` is already a canonical attribute or `canonical`
    /// does not exist.
    pub fn add_alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) -> bool {
        let alias = alias.into();
        let canonical = canonical.into();
        if self.attrs.contains_key(&alias) || !self.attrs.contains_key(&canonical) {
            return false;
        }
        self.aliases.insert(alias, canonical);
        true
    }

    /// Alias names and the attribute each points at.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, c)| (a.as_str(), c.as_str()))
    }

    /// Canonical attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

impl Attributes for PropertyHolder {
    fn get(&self, name: &str) -> Option<&Attribute> {
        self.attrs
            .get(name)
            .or_else(|| self.aliases.get(name).and_then(|c| self.attrs.get(c)))
    }

    fn to_raw(&self) -> Value {
        Value::Object(
            self.attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.to_raw()))
                .collect::<Map<_, _>>(),
        )
    }

    fn attribute_names(&self) -> Vec<String> {
        self.attrs.keys().chain(self.aliases.keys()).cloned().collect()
    }
}

/// Shared, per-client state every resource needs to talk to its server.
#[derive(Debug)]
pub struct ResourceContext {
    transport: Arc<ResilientTransport>,
    urls: ApiUrls,
    registry: ResourceRegistry,
    field_aliases: RwLock<Option<Arc<FieldAliases>>>,
    delay_reload: Duration,
}

impl ResourceContext {
    pub fn new(transport: Arc<ResilientTransport>, urls: ApiUrls) -> Self {
        Self {
            transport,
            urls,
            registry: ResourceRegistry::builtin(),
            field_aliases: RwLock::new(None),
            delay_reload: Duration::ZERO,
        }
    }

    pub fn with_registry(mut self, registry: ResourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn set_registry(&mut self, registry: ResourceRegistry) {
        self.registry = registry;
    }

    /// Pause between an update and the reload that follows it.
    pub fn with_delay_reload(mut self, delay: Duration) -> Self {
        self.delay_reload = delay;
        self
    }

    pub fn transport(&self) -> &ResilientTransport {
        &self.transport
    }

    pub fn urls(&self) -> &ApiUrls {
        &self.urls
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Aliases applied to issue fields, if loaded.
    pub fn field_aliases(&self) -> Option<Arc<FieldAliases>> {
        self.field_aliases.read().ok().and_then(|guard| guard.clone())
    }

    /// Replace or clear the alias table. Resources built earlier keep theirs.
    pub fn set_field_aliases(&self, aliases: Option<Arc<FieldAliases>>) {
        if let Ok(mut guard) = self.field_aliases.write() {
            *guard = aliases;
        }
    }
}

/// A server-side entity reachable by URL.
///
/// Two resources are equal when their `self` links are equal, whatever their
/// attribute snapshots hold.
#[derive(Clone)]
pub struct Resource {
    kind: ResourceKind,
    self_url: Option<String>,
    raw: Value,
    attrs: PropertyHolder,
    ctx: Arc<ResourceContext>,
}

impl Resource {
    /// Materialize a top-level payload.
    ///
    /// With no `kind`, the registry picks one from the `self` link.
    ///
    /// # Errors
    ///
    /// Fails with [`ApiError::Materialization`] when `raw` is not a non-empty
    /// object.
    pub fn from_raw(ctx: &Arc<ResourceContext>, kind: Option<ResourceKind>, raw: Value) -> Result<Self> {
        match raw.as_object() {
            Some(map) if !map.is_empty() => {}
            _ => return Err(ApiError::materialization("cannot materialize an empty resource", &raw)),
        }
        let kind = kind.unwrap_or_else(|| {
            raw.get("self")
                .and_then(Value::as_str)
                .map(|url| ctx.registry.kind_for(url))
                .unwrap_or(ResourceKind::Unknown)
        });
        Ok(Self::build(ctx, kind, raw))
    }

    fn build(ctx: &Arc<ResourceContext>, kind: ResourceKind, raw: Value) -> Self {
        let self_url = raw.get("self").and_then(Value::as_str).map(str::to_string);
        let mut attrs = raw.as_object().map(|map| materialize_map(ctx, map)).unwrap_or_default();

        if kind == ResourceKind::Issue {
            if let (Some(aliases), Some(Attribute::Holder(fields))) =
                (ctx.field_aliases(), attrs.get_mut("fields"))
            {
                aliases.apply(fields);
            }
        }

        Self {
            kind,
            self_url,
            raw,
            attrs,
            ctx: Arc::clone(ctx),
        }
    }

    /// GET a resource of `kind` by its ids and materialize it.
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn find(
        ctx: &Arc<ResourceContext>,
        kind: ResourceKind,
        ids: &[&str],
        params: &[(String, String)],
    ) -> Result<Self> {
        let path = format_template(kind.path_template(), ids)?;
        let url = ctx.urls.url(kind.api_base(), &path);
        let raw = ctx.transport.get_json(&url, params).await?;
        Self::from_raw(ctx, Some(kind), raw)
    }

    /// Re-fetch this resource from its `self` link.
    pub async fn reload(&mut self) -> Result<()> {
        let url = self.require_self_url()?.to_string();
        let raw = self.ctx.transport.get_json(&url, &[]).await?;
        let mut fresh = Self::from_raw(&self.ctx, Some(self.kind), raw)?;
        if fresh.self_url.is_none() {
            fresh.self_url = Some(url);
        }
        *self = fresh;
        Ok(())
    }

    /// PUT `fields` to this resource, then reload it.
    ///
    /// Issues take their changes under a `fields` key. With `notify` off the
    /// server is asked not to email watchers.
    #[instrument(skip_all, fields(kind = %self.kind))]
    pub async fn update(&mut self, fields: Value, notify: bool) -> Result<()> {
        let url = self.require_self_url()?.to_string();
        let body = match self.kind {
            ResourceKind::Issue => serde_json::json!({ "fields": fields }),
            _ => fields,
        };

        let mut request = Request::put(&url).json(body);
        if !notify {
            request = request.query("notifyUsers", "false");
        }
        self.ctx.transport.execute(request).await?;
        debug!(url = %url, "Resource updated");

        if !self.ctx.delay_reload.is_zero() {
            tokio::time::sleep(self.ctx.delay_reload).await;
        }
        self.reload().await
    }

    /// DELETE this resource.
    #[instrument(skip_all, fields(kind = %self.kind))]
    pub async fn delete(&self, params: &[(String, String)]) -> Result<()> {
        let url = self.require_self_url()?;
        self.ctx
            .transport
            .execute(Request::delete(url).query_pairs(params))
            .await?;
        debug!(url = %url, "Resource deleted");
        Ok(())
    }

    fn require_self_url(&self) -> Result<&str> {
        self.self_url
            .as_deref()
            .ok_or_else(|| ApiError::InvalidUrl(format!("{} resource has no self link", self.kind)))
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn self_url(&self) -> Option<&str> {
        self.self_url.as_deref()
    }

    /// The payload as received. Never changed by edits to the attributes.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn attributes(&self) -> &PropertyHolder {
        &self.attrs
    }

    pub fn attributes_mut(&mut self) -> &mut PropertyHolder {
        &mut self.attrs
    }

    pub fn context(&self) -> &Arc<ResourceContext> {
        &self.ctx
    }

    pub fn key(&self) -> Option<&str> {
        self.raw.get("key").and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.raw.get("id").and_then(Value::as_str)
    }
}

impl Attributes for Resource {
    fn get(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    fn to_raw(&self) -> Value {
        self.attrs.to_raw()
    }

    fn attribute_names(&self) -> Vec<String> {
        self.attrs.attribute_names()
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        match (&self.self_url, &other.self_url) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.kind == other.kind && self.raw == other.raw,
            _ => false,
        }
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.self_url {
            Some(url) => url.hash(state),
            None => {
                self.kind.hash(state);
                self.raw.to_string().hash(state);
            }
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("kind", &self.kind)
            .field("self", &self.self_url)
            .field("attributes", &self.attrs.len())
            .finish()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in READABLE_IDS {
            match self.raw.get(*name) {
                Some(Value::String(s)) => return f.write_str(s),
                Some(other) => return write!(f, "{}", other),
                None => {}
            }
        }
        match &self.self_url {
            Some(url) => write!(f, "<JIRA {} at {}>", self.kind, url),
            None => write!(f, "<JIRA {}>", self.kind),
        }
    }
}

fn materialize_map(ctx: &Arc<ResourceContext>, map: &Map<String, Value>) -> PropertyHolder {
    let mut holder = PropertyHolder::new();
    for (key, value) in map {
        holder.insert(key.clone(), materialize_value(ctx, Some(key), value));
    }
    holder
}

fn materialize_value(ctx: &Arc<ResourceContext>, key: Option<&str>, value: &Value) -> Attribute {
    match value {
        Value::Object(map) => {
            if let Some(url) = map.get("self").and_then(Value::as_str) {
                let kind = ctx.registry.kind_for(url);
                Attribute::Resource(Box::new(Resource::build(ctx, kind, value.clone())))
            } else if key == Some("timetracking") {
                Attribute::Resource(Box::new(Resource::build(
                    ctx,
                    ResourceKind::TimeTracking,
                    value.clone(),
                )))
            } else {
                Attribute::Holder(materialize_map(ctx, map))
            }
        }
        Value::Array(items) => {
            Attribute::List(items.iter().map(|item| materialize_value(ctx, None, item)).collect())
        }
        scalar => Attribute::from_scalar(scalar),
    }
}
