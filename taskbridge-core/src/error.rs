//! Error types for taskbridge-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from store and config persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Store JSON serialization/deserialization error.
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config YAML serialization error (save path).
    #[error("config YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Config YAML parse error on load — includes file path.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// No config file yet; `taskbridge init` creates one.
    #[error("config not found at {path}; run `taskbridge init` first")]
    ConfigNotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.taskbridge/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
