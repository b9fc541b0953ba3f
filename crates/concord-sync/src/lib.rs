//! # concord-sync
//!
//! Reconciliation core for Concord discussions.
//!
//! A discussion moves between three statuses (pre-discussion, active,
//! locked) and most mutations are refused unless it is active. On top of
//! that state machine the crate merges shared ephemeral settings between
//! devices, applies remote wipe, edit and reaction requests (deferring those
//! whose target has not arrived yet), and keeps the per-discussion counters
//! and illustrative message consistent with the stored messages.
//!
//! Synchronous callers drive a [`DiscussionEngine`] over a borrowed
//! [`concord_store::Database`]; async callers go through a [`DiscussionHub`].

pub mod collaborators;
pub mod config;
pub mod deletion;
pub mod engine;
pub mod error;
pub mod events;
pub mod hub;
pub mod messages;
pub mod shared_config;
pub mod tracker;

mod deferred;
mod remote;
mod status;

pub use collaborators::{BadgeCounters, BadgeSink, BadgeTotals, MembershipProvider};
pub use config::{EqualVersionPolicy, SyncConfig};
pub use deletion::DiscussionDeletionOutcome;
pub use engine::DiscussionEngine;
pub use error::{GatedOperation, Result, SyncError};
pub use events::{
    BadgeDelta, DiscussionEvent, InfoAboutWipedOrDeletedMessage, Outcome, Outbox,
    WipedOrDeletedKind,
};
pub use hub::DiscussionHub;
pub use messages::InboundMessage;
pub use shared_config::MergeOutcome;
pub use tracker::DividerPlacement;
