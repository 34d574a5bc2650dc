//! Client configuration.
//!
//! [`ClientOptions`] deserializes with defaults for every missing field, so
//! an embedding application can keep it in whatever settings format it
//! already uses. Secrets never live here.

mod options;

use thiserror::Error;

pub use options::{ClientOptions, WILDCARD_BATCH_KEY};

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is present but unusable.
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
