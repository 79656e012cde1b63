//! Error types for storage operations.
//!
//! Provides [`StorageError`], the unified error taxonomy shared by every
//! backend and by the [`StorageService`](crate::service::StorageService)
//! router. `NotFound` is normalized to an absent value at the interface
//! (`get` returns `Ok(None)`); every other kind surfaces to the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendKind;

/// Convenience alias used throughout the crate.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Retry policy belongs to the caller: the storage layer itself never
/// retries a failed transport call (the one exception is the bounded
/// conditional-write loop inside `update` on the DynamoDB backend, which
/// retries contention, not transport failures).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key does not exist.
    ///
    /// Absorbed by `get`/`delete` and returned as absent; only internal
    /// plumbing observes this variant directly.
    #[error("key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A caller-supplied argument was malformed (bad URI, unknown
    /// namespace, unknown backend tag).
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable description of the problem.
        message: String,
    },

    /// The backend could not be reached or rejected the call at the
    /// transport level (network failure, throttling, missing table).
    #[error("{backend} backend unavailable: {message}")]
    Unavailable {
        /// Which backend failed.
        backend: BackendKind,
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Timed out acquiring the cooperative file lock for `update`.
    #[error("timed out after {waited_ms} ms waiting for lock {}", path.display())]
    LockTimeout {
        /// Path of the contended `.lock` file.
        path: PathBuf,
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// The operation is not part of this backend's capability set
    /// (e.g. `append` on the secrets backend).
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// The backend that rejected the operation.
        backend: BackendKind,
        /// The rejected operation name.
        operation: &'static str,
    },

    /// A stored record could not be decoded and no recovery path applied.
    #[error("corrupt record {key}: {message}")]
    Corruption {
        /// The affected key.
        key: String,
        /// What failed to decode.
        message: String,
    },

    /// The service configuration is invalid or incomplete for the
    /// requested routing.
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong.
        message: String,
        /// Which configuration key to set to fix it, when known.
        hint: Option<String>,
    },
}

impl StorageError {
    /// Builds a [`StorageError::Config`] with a corrective hint naming the
    /// configuration key the caller should set.
    pub fn config(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Builds an [`StorageError::Unavailable`] from an underlying error.
    pub fn unavailable(
        backend: BackendKind,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            backend,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Returns `true` for the `NotFound` kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The corrective hint attached to a configuration error, if any.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Config { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = StorageError::NotFound {
            key: "sessions/abc".to_string(),
        };
        assert_eq!(err.to_string(), "key not found: sessions/abc");
    }

    #[test]
    fn display_unsupported_names_backend_and_operation() {
        let err = StorageError::Unsupported {
            backend: BackendKind::SecretsManager,
            operation: "append",
        };
        assert_eq!(
            err.to_string(),
            "append is not supported by the secrets-manager backend"
        );
    }

    #[test]
    fn display_lock_timeout_includes_path_and_wait() {
        let err = StorageError::LockTimeout {
            path: PathBuf::from("/tmp/s/sessions/k.json.lock"),
            waited_ms: 10_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("10000 ms"));
        assert!(msg.contains("k.json.lock"));
    }

    #[test]
    fn unavailable_preserves_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = StorageError::unavailable(BackendKind::DynamoDb, inner);
        let source = std::error::Error::source(&err).expect("source should be set");
        assert!(source.to_string().contains("timed out"));
    }

    #[test]
    fn config_hint_is_accessible() {
        let err = StorageError::config("cloud transcripts need a memory resource", "agentcore.memoryArn");
        assert_eq!(err.hint(), Some("agentcore.memoryArn"));
        assert!(err.to_string().contains("memory resource"));
    }

    #[test]
    fn hint_is_none_for_other_kinds() {
        let err = StorageError::InvalidArgument {
            message: "bad".into(),
        };
        assert!(err.hint().is_none());
    }
}
