//! # concord-store
//!
//! Local persistence for Concord discussions, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for discussions,
//! messages, reactions, deferred remote requests and per-participant
//! sequence tracking. Higher-level reconciliation lives in `concord-sync`.

pub mod database;
pub mod deferred;
pub mod discussions;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod participants;
pub mod reactions;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
