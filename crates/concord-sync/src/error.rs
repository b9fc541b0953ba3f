use std::fmt;

use concord_shared::DiscussionStatus;
use concord_store::StoreError;
use thiserror::Error;

/// Operations refused unless the discussion is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatedOperation {
    CreateMessage,
    SendMessage,
    WipeMessages,
    UpdateMessage,
    LocalUpdateMessage,
    SetReaction,
    LocalReaction,
    WipeAllMessages,
    DeleteDiscussionGlobally,
    DeleteMessagesGlobally,
    RecordScreenCapture,
    MergeSharedConfiguration,
    ReplaceSharedConfiguration,
}

impl fmt::Display for GatedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreateMessage => "cannot create a message",
            Self::SendMessage => "cannot send a message",
            Self::WipeMessages => "cannot wipe messages",
            Self::UpdateMessage => "cannot apply a remote edit",
            Self::LocalUpdateMessage => "cannot edit a message",
            Self::SetReaction => "cannot apply a remote reaction",
            Self::LocalReaction => "cannot react to a message",
            Self::WipeAllMessages => "cannot wipe the discussion",
            Self::DeleteDiscussionGlobally => "cannot delete the discussion on other devices",
            Self::DeleteMessagesGlobally => "cannot delete messages on other devices",
            Self::RecordScreenCapture => "cannot record a screen capture",
            Self::MergeSharedConfiguration => "cannot merge shared settings",
            Self::ReplaceSharedConfiguration => "cannot change shared settings",
        };
        f.write_str(s)
    }
}

/// Errors produced by the synchronization core.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The discussion is locked or not started yet.
    #[error("{operation} in a {status} discussion")]
    StatusViolation {
        operation: GatedOperation,
        status: DiscussionStatus,
    },

    /// The requester is not the actor the operation expects.
    #[error("Identity mismatch: {0}")]
    IdentityMismatch(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A programming contract was broken by the caller.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Refused by a deletion or wipe policy.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking task running the operation panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Report a broken contract: fatal in debug builds, logged in release.
pub(crate) fn invariant_violation(message: impl Into<String>) -> SyncError {
    let message = message.into();
    tracing::error!(%message, "invariant violation");
    debug_assert!(false, "invariant violation: {message}");
    SyncError::InvariantViolation(message)
}
