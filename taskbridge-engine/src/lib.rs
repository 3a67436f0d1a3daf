//! taskbridge engine — bidirectional reconciliation between vault documents
//! and the remote task service.
//!
//! Public API surface:
//! - [`cycle`] — [`run_cycle`] / [`sync_once`] and the [`CycleReport`]
//! - [`resolver`] — pure conflict resolution
//! - [`vault`] — the [`Vault`] trait and [`FsVault`]
//! - [`pacer`] — cooperative yield-point contract
//! - [`error`] — [`EngineError`]
//!
//! [`scan`], [`hierarchy`], and [`writeback`] are the per-document stages
//! the cycle composes; they are public for the daemon's diagnostics but the
//! cycle is the supported entrypoint.

pub mod cycle;
pub mod error;
pub mod hierarchy;
pub mod pacer;
pub mod resolver;
pub mod scan;
pub mod search;
pub mod vault;
pub mod writeback;

pub use cycle::{run_cycle, sync_once, CycleReport};
pub use error::EngineError;
pub use pacer::{NoopPacer, Pacer};
pub use resolver::resolve;
pub use vault::{FsVault, Vault};
