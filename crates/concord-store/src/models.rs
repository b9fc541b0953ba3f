//! Domain model structs persisted in the local database.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use concord_shared::{
    CryptoId, DiscussionKind, DiscussionStatus, LocalConfiguration, MessageKind, MessageReference,
    SharedConfiguration, SystemMessageCategory, UserMention,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Discussion
// ---------------------------------------------------------------------------

/// A conversation tied to one owned identity and one contact or group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discussion {
    /// Permanent identifier, stable across restarts and notifications.
    pub id: Uuid,
    pub owned_identity: CryptoId,
    pub kind: DiscussionKind,
    pub status: DiscussionStatus,
    pub title: String,
    pub shared_configuration: SharedConfiguration,
    pub local_configuration: LocalConfiguration,
    /// Thread id used in the references of messages sent from this device.
    pub sender_thread_id: Uuid,
    pub last_outbound_message_sequence_number: u64,
    pub last_system_message_sequence_number: u64,
    pub number_of_new_messages: u64,
    pub a_new_received_message_does_mention_owned_identity: bool,
    /// Lookup only; the message may have disappeared since.
    pub illustrative_message_id: Option<Uuid>,
    /// `None` means unpinned.
    pub pinned_index: Option<u32>,
    pub is_archived: bool,
    pub timestamp_of_last_message: DateTime<Utc>,
    /// Messages sent before this server timestamp are discarded on arrival.
    pub server_timestamp_of_last_remote_deletion: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Discussion {
    pub fn new(
        owned_identity: CryptoId,
        kind: DiscussionKind,
        status: DiscussionStatus,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owned_identity,
            kind,
            status,
            title: title.into(),
            shared_configuration: SharedConfiguration::default(),
            local_configuration: LocalConfiguration::default(),
            sender_thread_id: Uuid::new_v4(),
            last_outbound_message_sequence_number: 0,
            last_system_message_sequence_number: 0,
            number_of_new_messages: 0,
            a_new_received_message_does_mention_owned_identity: false,
            illustrative_message_id: None,
            pinned_index: None,
            is_archived: false,
            timestamp_of_last_message: now,
            server_timestamp_of_last_remote_deletion: None,
            created_at: now,
        }
    }

    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        self.local_configuration.has_valid_mute_end_date(now)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A received, sent or system message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub discussion_id: Uuid,
    pub kind: MessageKind,
    /// `None` for system messages.
    pub sender_identity: Option<CryptoId>,
    /// Sender sequence for received/sent messages, system sequence otherwise.
    pub sender_sequence_number: u64,
    pub sender_thread_id: Option<Uuid>,
    pub server_message_id: Option<String>,
    pub sort_index: f64,
    pub timestamp: DateTime<Utc>,
    pub body: Option<String>,
    pub mentions: BTreeSet<UserMention>,
    pub does_mention_owned_identity: bool,
    pub is_new: bool,
    pub is_wiped: bool,
    /// Set when someone other than the author or the owned identity wiped it.
    pub wiped_by: Option<CryptoId>,
    pub edited_at: Option<DateTime<Utc>>,
    pub system_category: Option<SystemMessageCategory>,
    pub system_actor: Option<CryptoId>,
}

impl Message {
    /// Global reference of a received or sent message.
    pub fn reference(&self) -> Option<MessageReference> {
        match (self.kind, self.sender_identity, self.sender_thread_id) {
            (MessageKind::System, _, _) => None,
            (_, Some(sender_identity), Some(sender_thread_id)) => Some(MessageReference {
                sender_identity,
                sender_sequence_number: self.sender_sequence_number,
                sender_thread_id,
            }),
            _ => None,
        }
    }

    /// Build a received or sent message from its reference.
    pub fn from_reference(
        discussion_id: Uuid,
        kind: MessageKind,
        reference: &MessageReference,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            discussion_id,
            kind,
            sender_identity: Some(reference.sender_identity),
            sender_sequence_number: reference.sender_sequence_number,
            sender_thread_id: Some(reference.sender_thread_id),
            server_message_id: None,
            sort_index: sort_index_of(&timestamp),
            timestamp,
            body: None,
            mentions: BTreeSet::new(),
            does_mention_owned_identity: false,
            is_new: false,
            is_wiped: false,
            wiped_by: None,
            edited_at: None,
            system_category: None,
            system_actor: None,
        }
    }

    /// Build a system message. The caller picks the sort index.
    pub fn system(
        discussion_id: Uuid,
        sequence_number: u64,
        category: SystemMessageCategory,
        actor: Option<CryptoId>,
        sort_index: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            discussion_id,
            kind: MessageKind::System,
            sender_identity: None,
            sender_sequence_number: sequence_number,
            sender_thread_id: None,
            server_message_id: None,
            sort_index,
            timestamp,
            body: None,
            mentions: BTreeSet::new(),
            does_mention_owned_identity: false,
            is_new: false,
            is_wiped: false,
            wiped_by: None,
            edited_at: None,
            system_category: Some(category),
            system_actor: actor,
        }
    }

    pub fn is_system(&self, category: SystemMessageCategory) -> bool {
        self.system_category == Some(category)
    }
}

/// Seconds since the epoch, as used for sort indexes.
pub fn sort_index_of(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub reactor: CryptoId,
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Deferred request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredRequestKind {
    Wipe,
    Edit,
    Reaction,
}

impl DeferredRequestKind {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Wipe => 0,
            Self::Edit => 1,
            Self::Reaction => 2,
        }
    }

    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::Wipe),
            1 => Some(Self::Edit),
            2 => Some(Self::Reaction),
            _ => None,
        }
    }
}

/// A remote request whose target message was not known when it arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeferredRequest {
    /// Assigned by the store; increases with arrival order.
    pub id: i64,
    pub discussion_id: Uuid,
    pub requester: CryptoId,
    pub kind: DeferredRequestKind,
    pub target: MessageReference,
    /// Original request as JSON (edit and reaction requests).
    pub payload: Option<String>,
    pub server_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DeferredRequest {
    pub fn new(
        discussion_id: Uuid,
        requester: CryptoId,
        kind: DeferredRequestKind,
        target: MessageReference,
        payload: Option<String>,
        server_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            discussion_id,
            requester,
            kind,
            target,
            payload,
            server_timestamp,
            created_at: Utc::now(),
        }
    }
}
