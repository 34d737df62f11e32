//! Error types for object storage operations.

use std::fmt;

/// Result type for object storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during object storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// Object not found at the specified path.
    NotFound { path: String },

    /// Invalid or incomplete backend configuration. Raised by constructors
    /// before any network call is made.
    Configuration { reason: String },

    /// The backend cannot perform the requested operation with the
    /// credentials it was given.
    Unsupported {
        backend: &'static str,
        operation: &'static str,
        reason: String,
    },

    /// Backend not compiled in or unknown.
    UnsupportedBackend { backend: String },

    /// Local filesystem error.
    Io { source: std::io::Error },

    /// Provider or transport error, returned once retries are exhausted.
    Provider { source: anyhow::Error },

    /// Presigned URL generation error.
    Presign { reason: String },

    /// Generic error.
    Other { source: anyhow::Error },
}

impl StorageError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        StorageError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn provider<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        StorageError::Provider { source: err.into() }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        StorageError::NotFound { path: path.into() }
    }

    /// Whether this error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Whether this error reports a capability the backend lacks.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            StorageError::Unsupported { .. } | StorageError::UnsupportedBackend { .. }
        )
    }

    /// Whether retrying the failed call could succeed.
    ///
    /// Only provider errors are transient. Local disk failures, bad
    /// configuration and missing objects are returned as they are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Provider { .. })
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound { path } => write!(f, "Object not found: {}", path),
            StorageError::Configuration { reason } => {
                write!(f, "Invalid storage configuration: {}", reason)
            }
            StorageError::Unsupported {
                backend,
                operation,
                reason,
            } => write!(
                f,
                "Operation '{}' is not supported by the {} backend: {}",
                operation, backend, reason
            ),
            StorageError::UnsupportedBackend { backend } => {
                write!(f, "Unsupported backend: {}", backend)
            }
            StorageError::Io { source } => write!(f, "I/O error: {}", source),
            StorageError::Provider { source } => write!(f, "Provider error: {:#}", source),
            StorageError::Presign { reason } => {
                write!(f, "Presigned URL generation error: {}", reason)
            }
            StorageError::Other { source } => write!(f, "Object storage error: {}", source),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io { source } => Some(source),
            StorageError::Provider { source } => Some(&**source),
            StorageError::Other { source } => Some(&**source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io { source: err }
    }
}

impl From<anyhow::Error> for StorageError {
    fn from(err: anyhow::Error) -> Self {
        StorageError::Other { source: err }
    }
}

#[cfg(any(feature = "azure", feature = "gcp"))]
impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound { path },
            object_store::Error::UnknownConfigurationKey { .. } => StorageError::Configuration {
                reason: err.to_string(),
            },
            object_store::Error::NotSupported { .. } | object_store::Error::NotImplemented { .. } => {
                StorageError::Unsupported {
                    backend: "object_store",
                    operation: "unknown",
                    reason: err.to_string(),
                }
            }
            _ => StorageError::Provider {
                source: anyhow::Error::from(err),
            },
        }
    }
}

impl From<url::ParseError> for StorageError {
    fn from(err: url::ParseError) -> Self {
        StorageError::Configuration {
            reason: format!("invalid URL: {}", err),
        }
    }
}

impl From<figment::Error> for StorageError {
    fn from(err: figment::Error) -> Self {
        StorageError::Configuration {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(StorageError::not_found("a/b").is_not_found());
        assert!(StorageError::provider(anyhow::anyhow!("reset")).is_retryable());
        assert!(!StorageError::config("missing bucket").is_retryable());

        let io = StorageError::from(std::io::Error::other("disk"));
        assert!(!io.is_retryable());
        assert!(std::error::Error::source(&io).is_some());

        let unsupported = StorageError::Unsupported {
            backend: "azure",
            operation: "generate_presigned_url",
            reason: "token credential required".to_string(),
        };
        assert!(unsupported.is_unsupported());
        assert_eq!(
            unsupported.to_string(),
            "Operation 'generate_presigned_url' is not supported by the azure backend: token \
             credential required"
        );
    }

    #[test]
    fn test_url_parse_is_configuration_error() {
        let err: StorageError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, StorageError::Configuration { .. }));
    }
}
