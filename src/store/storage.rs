use std::error::Error;

use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying transport.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend unreachable or refusing service.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human-readable failure description.
        message: String,
        /// Underlying backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Optimistic retries exhausted without an unconflicted commit.
    #[error("transaction on `{key}` exceeded its retry budget")]
    Contention {
        /// Document key the transaction kept losing on.
        key: String,
    },
    /// A committed document no longer decodes as its expected shape.
    #[error("document `{key}` is not decodable")]
    Codec {
        /// Document key holding the undecodable value.
        key: String,
        /// Decode failure.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
