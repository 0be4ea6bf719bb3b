//! Error types for typed error handling.
//!
//! Every failure the store or one of its backends can produce maps onto
//! one variant of [`Error`]. "Key not found" is not an error: lookups
//! return `Ok(None)` instead.

/// Boxed cause carried by I/O-flavoured variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for property store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Property store errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad constructor arguments or an initial load that failed.
    #[error("configuration error: {reason}")]
    Configuration {
        reason: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// The backing source could not be read (I/O, connectivity, malformed content).
    #[error("source '{location}' unavailable: {cause}")]
    SourceUnavailable {
        location: String,
        #[source]
        cause: BoxError,
    },

    /// A write-back to the backing source failed; the cache was left unchanged.
    #[error("failed to persist changes to '{location}': {cause}")]
    Persistence {
        location: String,
        #[source]
        cause: BoxError,
    },

    /// A directory binding resolved to something that is not a key/value aggregate.
    #[error("'{name}' must be bound to a key/value map or properties object, found {found}")]
    InvalidSourceFormat { name: String, found: String },

    /// A write was attempted against a read-only backend.
    #[error("{operation} is not supported by {backend} sources")]
    UnsupportedOperation {
        backend: &'static str,
        operation: &'static str,
    },
}

impl Error {
    /// Create a configuration error without an underlying cause.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a configuration error wrapping the failure that caused it.
    pub fn configuration_caused_by(reason: impl Into<String>, source: Error) -> Self {
        Self::Configuration {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a source unavailable error.
    pub fn source_unavailable(location: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::SourceUnavailable {
            location: location.into(),
            cause: cause.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(location: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Persistence {
            location: location.into(),
            cause: cause.into(),
        }
    }

    /// Create an invalid source format error.
    pub fn invalid_source_format(name: impl Into<String>, found: impl Into<String>) -> Self {
        Self::InvalidSourceFormat {
            name: name.into(),
            found: found.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(backend: &'static str, operation: &'static str) -> Self {
        Self::UnsupportedOperation { backend, operation }
    }

    /// Returns true if a later attempt of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::Persistence { .. }
        )
    }
}
