//! jirakit - a resilient JIRA REST client core.
//!
//! The crate provides the plumbing an application needs to talk to JIRA:
//! an HTTP transport that retries transient failures and refreshes cookie
//! sessions, pluggable credentials, a dynamic resource model keyed by URL,
//! and paginated collection fetching.
//!
//! ```no_run
//! # async fn run() -> jirakit::Result<()> {
//! use jirakit::api::JiraClient;
//!
//! let client = JiraClient::with_credentials("https://company.atlassian.net", "me@example.com", "token")?;
//! let issues = client.search_issues("project = PROJ", 0, None, &["summary"]).await?;
//! for issue in &issues {
//!     println!("{}", issue);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
