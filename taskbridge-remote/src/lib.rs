//! taskbridge remote — wire contract and HTTP client for the task service.
//!
//! Public API surface:
//! - [`api`] — request/response wire types
//! - [`client`] — the [`RemoteApi`] trait, [`HttpRemote`], [`BackoffPolicy`]
//! - [`error`] — [`RemoteError`]

pub mod api;
pub mod client;
pub mod error;

pub use api::RemoteItem;
pub use client::{
    BackoffPolicy, CreateOutcome, CreateSpec, HttpRemote, MoveSpec, PullBatch, RemoteApi,
    UpdateSpec,
};
pub use error::RemoteError;
