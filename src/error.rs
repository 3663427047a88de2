use crate::types::RoleName;
use thiserror::Error;

/// Provider-layer error type.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Attribute predicate error type.
pub type AttributeError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider error wrapper.
    #[error("provider error: {0}")]
    Provider(#[source] ProviderError),
    /// Attribute predicate failed instead of returning a value.
    #[error("attribute {name} failed: {source}")]
    Attribute {
        name: String,
        #[source]
        source: AttributeError,
    },
    /// Attribute is not registered and the registry refuses missing attributes.
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),
    /// Invalid attribute registration.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Role inheritance deeper than the configured limit.
    #[error("role inheritance depth exceeded at role {role}; max depth {max_depth}")]
    DepthExceeded { role: RoleName, max_depth: usize },
    /// Invalid permission expression input.
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    /// Malformed JSON rules.
    #[cfg(feature = "json-provider")]
    #[error("invalid json rules: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProviderError> for Error {
    fn from(error: ProviderError) -> Self {
        Self::Provider(error)
    }
}
