//! taskbridge core library — domain types, task store, configuration, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs
//! - [`store`] — the in-memory [`TaskStore`] and its JSON persistence
//! - [`config`] — [`SyncConfig`] YAML load / save / init
//! - [`error`] — [`StoreError`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::SyncConfig;
pub use error::StoreError;
pub use store::TaskStore;
pub use types::{
    ChangeOrigin, ChangeSet, ConflictWindow, DueStamp, PendingChange, Priority, SyncCursor,
    TaskFields, TaskId, TaskRecord,
};
