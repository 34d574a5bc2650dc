//! JIRA API client and types.
//!
//! Requests flow through [`ResilientTransport`], which owns retry,
//! classification and session refresh. [`Resource`] and
//! [`PaginatedFetcher`] turn responses into navigable objects, and
//! [`JiraClient`] ties everything to a configured server.

mod auth;
pub mod classify;
mod client;
mod cookie;
pub mod endpoint;
pub mod error;
pub mod fields;
mod pagination;
pub mod registry;
pub mod resource;
pub mod retry;
pub mod transport;

pub use auth::{Anonymous, BasicAuth, CredentialProvider, TokenAuth};
pub use classify::{Classification, RateLimitInfo, Verdict};
pub use client::JiraClient;
pub use cookie::{CookieAuth, DEFAULT_SESSION_REFRESH};
pub use endpoint::{ApiBase, ApiUrls, Endpoint};
pub use error::{ApiError, RequestSummary, Result, TransportError};
pub use fields::FieldAliases;
pub use pagination::{FetchMode, PageQuery, PaginatedFetcher, ResultList, DEFAULT_ASYNC_WORKERS};
pub use registry::{ResourceKind, ResourcePattern, ResourceRegistry};
pub use resource::{Attribute, Attributes, PropertyHolder, Resource, ResourceContext};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use transport::{
    BodyFactory, HttpSender, PreparedRequest, RawResponse, ReqwestSender, Request, RequestBody, ResilientTransport,
    SendError, SendErrorKind,
};
