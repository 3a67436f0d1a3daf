//! Error types for taskbridge-remote.

use thiserror::Error;

/// All errors that can arise from remote API calls.
///
/// Only rate limiting is retried (inside the client, with bounded backoff);
/// every other variant fails the specific batch and is surfaced to the
/// caller, which continues with its remaining work.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A batch exceeded the service's per-call item cap.
    #[error("batch of {size} items exceeds the {limit}-item service cap")]
    BatchTooLarge { size: usize, limit: usize },

    /// HTTP 429 persisted through every backoff attempt.
    #[error("rate limited; gave up after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Connection-level failure (DNS, TLS, timeout).
    #[error("remote transport error: {0}")]
    Transport(String),

    /// Non-retryable HTTP error from the service.
    #[error("remote service error (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    /// The service rejected the sync cursor; the client falls back to a
    /// wildcard pull once before surfacing this.
    #[error("sync cursor rejected by the service")]
    InvalidCursor,

    /// A command inside an otherwise-accepted batch was rejected.
    #[error("remote command {uuid} failed: {message}")]
    Command { uuid: String, message: String },

    /// The response body did not match the wire contract.
    #[error("malformed remote response: {0}")]
    Decode(#[from] std::io::Error),
}
