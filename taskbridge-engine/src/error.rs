//! Error types for taskbridge-engine.

use std::path::PathBuf;

use thiserror::Error;

use taskbridge_core::StoreError;
use taskbridge_remote::RemoteError;

/// All errors that can arise from reconciliation and the sync cycle.
///
/// Only a handful of these abort a cycle (pull failure, persistence
/// failure); most are surfaced per document or per batch and the cycle
/// continues.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An error from store or config persistence.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An error from the remote sync client.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Whether this is a missing-file I/O error. A document that vanished
    /// between selection and read is treated as empty, not fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// Convenience constructor for [`EngineError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}
