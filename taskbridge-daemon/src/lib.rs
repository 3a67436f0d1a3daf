//! taskbridge daemon — background sync runtime with socket control.
//!
//! Public API surface:
//! - [`start_blocking`] / [`runtime::run`] — the daemon runtime
//! - [`protocol`] — socket client helpers for the CLI
//! - [`paths`] — socket and root path helpers
//! - [`DaemonError`]

pub mod error;
pub mod paths;
pub mod protocol;
pub mod runtime;

pub use error::DaemonError;
pub use protocol::{request_status, request_stop, request_sync};
pub use runtime::start_blocking;
