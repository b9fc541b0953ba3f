//! Outbox of post-commit notifications.
//!
//! Operations never publish anything themselves. They collect events and
//! badge deltas in an [`Outbox`] while the transaction is open and hand them
//! back in an [`Outcome`]; the caller publishes them once the transaction is
//! durably committed.

use concord_shared::{
    CryptoId, DeletionType, DiscussionStatus, MessageReference, ReactionRequest,
    SharedConfiguration, SharedConfigurationPayload, UpdateMessageRequest,
};
use serde::Serialize;
use uuid::Uuid;

use crate::collaborators::BadgeSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WipedOrDeletedKind {
    /// The message stays as a placeholder without content.
    Wiped,
    /// The message row is gone.
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InfoAboutWipedOrDeletedMessage {
    pub kind: WipedOrDeletedKind,
    pub discussion_id: Uuid,
    pub message_id: Uuid,
}

/// Serialized externally tagged, e.g. `{"archived":{"discussion_id":"..."}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionEvent {
    Inserted {
        discussion_id: Uuid,
    },
    Renamed {
        discussion_id: Uuid,
        title: String,
    },
    StatusChanged {
        discussion_id: Uuid,
        status: DiscussionStatus,
    },
    Archived {
        discussion_id: Uuid,
    },
    Unarchived {
        discussion_id: Uuid,
    },
    PinnedIndexChanged {
        discussion_id: Uuid,
        pinned_index: Option<u32>,
    },
    Deleted {
        discussion_id: Uuid,
    },
    MessagesWipedOrDeleted(Vec<InfoAboutWipedOrDeletedMessage>),
    SharedConfigurationUpdated {
        discussion_id: Uuid,
        configuration: SharedConfiguration,
        initiator: CryptoId,
    },
    /// Peers should receive our current shared configuration.
    SharedConfigurationShouldBeSent {
        discussion_id: Uuid,
        payload: SharedConfigurationPayload,
    },
    OutboundMessageCreated {
        discussion_id: Uuid,
        message_id: Uuid,
    },
    MessageEditShouldBeSent {
        discussion_id: Uuid,
        request: UpdateMessageRequest,
    },
    ReactionShouldBeSent {
        discussion_id: Uuid,
        request: ReactionRequest,
    },
    DiscussionDeletionShouldBePropagated {
        discussion_id: Uuid,
        deletion_type: DeletionType,
    },
    MessageDeletionShouldBePropagated {
        discussion_id: Uuid,
        references: Vec<MessageReference>,
        deletion_type: DeletionType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeDelta {
    NewMessages { owned_identity: CryptoId, delta: i64 },
    Mentions { owned_identity: CryptoId, delta: i64 },
}

/// Result of a committed operation together with what it wants published.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<DiscussionEvent>,
    pub badge_deltas: Vec<BadgeDelta>,
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            events: self.events,
            badge_deltas: self.badge_deltas,
        }
    }

    /// Forward the buffered badge deltas to the real aggregator.
    pub fn apply_badge_deltas(&self, sink: &mut dyn BadgeSink) {
        for delta in &self.badge_deltas {
            match delta {
                BadgeDelta::NewMessages {
                    owned_identity,
                    delta,
                } => sink.add_to_new_messages(owned_identity, *delta),
                BadgeDelta::Mentions {
                    owned_identity,
                    delta,
                } => sink.add_to_mentions(owned_identity, *delta),
            }
        }
    }
}

/// Collects events and badge deltas during one transaction.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<DiscussionEvent>,
    badge_deltas: Vec<BadgeDelta>,
    discussion_deleted: bool,
}

impl Outbox {
    pub fn push(&mut self, event: DiscussionEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[DiscussionEvent] {
        &self.events
    }

    /// The discussion row was removed; it must not be written back.
    pub(crate) fn mark_discussion_deleted(&mut self) {
        self.discussion_deleted = true;
    }

    pub(crate) fn discussion_deleted(&self) -> bool {
        self.discussion_deleted
    }

    pub fn into_outcome<T>(self, value: T) -> Outcome<T> {
        Outcome {
            value,
            events: self.events,
            badge_deltas: self.badge_deltas,
        }
    }
}

impl BadgeSink for Outbox {
    fn add_to_new_messages(&mut self, owned_identity: &CryptoId, delta: i64) {
        if delta != 0 {
            self.badge_deltas.push(BadgeDelta::NewMessages {
                owned_identity: *owned_identity,
                delta,
            });
        }
    }

    fn add_to_mentions(&mut self, owned_identity: &CryptoId, delta: i64) {
        if delta != 0 {
            self.badge_deltas.push(BadgeDelta::Mentions {
                owned_identity: *owned_identity,
                delta,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::BadgeCounters;

    #[test]
    fn zero_deltas_are_not_buffered() {
        let owned = CryptoId([1u8; 32]);
        let mut outbox = Outbox::default();
        outbox.add_to_new_messages(&owned, 0);
        outbox.add_to_new_messages(&owned, 2);
        outbox.add_to_mentions(&owned, -1);

        let outcome = outbox.into_outcome(());
        assert_eq!(outcome.badge_deltas.len(), 2);

        let mut counters = BadgeCounters::new();
        outcome.apply_badge_deltas(&mut counters);
        assert_eq!(counters.totals(&owned).new_messages, 2);
        assert_eq!(counters.totals(&owned).mentions, -1);
    }

    #[test]
    fn events_serialize_with_their_variant_name() {
        let discussion_id = Uuid::new_v4();
        let json = serde_json::to_value(DiscussionEvent::Archived { discussion_id }).unwrap();
        assert_eq!(
            json["archived"]["discussion_id"],
            serde_json::Value::String(discussion_id.to_string())
        );

        let wiped = DiscussionEvent::MessagesWipedOrDeleted(vec![InfoAboutWipedOrDeletedMessage {
            kind: WipedOrDeletedKind::Wiped,
            discussion_id,
            message_id: Uuid::new_v4(),
        }]);
        let json = serde_json::to_value(wiped).unwrap();
        assert_eq!(json["messages_wiped_or_deleted"][0]["kind"], "wiped");
    }
}
