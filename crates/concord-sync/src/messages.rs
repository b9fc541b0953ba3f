//! Creation of received, sent and screen-capture messages.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use concord_shared::{
    CryptoId, DiscussionKind, MessageKind, MessageReference, SystemMessageCategory, UserMention,
};
use concord_store::{sort_index_of, Discussion, Message};
use uuid::Uuid;

use crate::engine::{touch_last_message, DiscussionEngine};
use crate::error::{GatedOperation, Result, SyncError};
use crate::events::{DiscussionEvent, Outbox, Outcome};
use crate::status::ensure_active;

/// A decrypted message as delivered by the transport, either from a
/// contact or from another device of the owned identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub reference: MessageReference,
    pub server_message_id: Option<String>,
    pub server_timestamp: DateTime<Utc>,
    pub body: Option<String>,
    pub mentions: BTreeSet<UserMention>,
}

impl DiscussionEngine<'_> {
    /// Store a message received from a contact, then replay whatever was
    /// waiting for it. Returns `None` when the message predates the last
    /// remote wipe of the discussion and was discarded.
    pub fn create_received_message(
        &self,
        discussion_id: Uuid,
        inbound: &InboundMessage,
    ) -> Result<Outcome<Option<Message>>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::CreateMessage)?;

            let sender = inbound.reference.sender_identity;
            self.ensure_may_post(discussion, &sender)?;
            if predates_remote_deletion(discussion, &inbound.server_timestamp) {
                return Ok(None);
            }

            let does_mention = inbound
                .mentions
                .iter()
                .any(|m| m.mentioned_identity == discussion.owned_identity);

            let mut message = match self.db.find_message_by_sender_sequence(
                discussion.id,
                MessageKind::Received,
                &inbound.reference,
            )? {
                Some(existing) => self.overwrite(existing, inbound, does_mention)?,
                None => {
                    let mut message = Message::from_reference(
                        discussion.id,
                        MessageKind::Received,
                        &inbound.reference,
                        inbound.server_timestamp,
                    );
                    message.is_new = true;
                    message.server_message_id = inbound.server_message_id.clone();
                    message.body = inbound.body.clone();
                    message.mentions = inbound.mentions.clone();
                    message.does_mention_owned_identity = does_mention;
                    self.db.insert_message(&message)?;
                    message
                }
            };

            self.db.upsert_participant_sequence_number(
                discussion.id,
                &sender,
                inbound.reference.sender_thread_id,
                inbound.reference.sender_sequence_number,
            )?;

            self.after_message_stored(discussion, out, &mut message)?;
            Ok(Some(message))
        })
    }

    /// Store a message the owned identity sent from another device.
    pub fn create_sent_message_from_other_owned_device(
        &self,
        discussion_id: Uuid,
        inbound: &InboundMessage,
    ) -> Result<Outcome<Option<Message>>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::CreateMessage)?;

            if inbound.reference.sender_identity != discussion.owned_identity {
                return Err(SyncError::IdentityMismatch(format!(
                    "{} is not the owned identity of discussion {}",
                    inbound.reference.sender_identity.short(),
                    discussion.id
                )));
            }
            if predates_remote_deletion(discussion, &inbound.server_timestamp) {
                return Ok(None);
            }

            let mut message = match self.db.find_message_by_sender_sequence(
                discussion.id,
                MessageKind::Sent,
                &inbound.reference,
            )? {
                Some(existing) => self.overwrite(existing, inbound, false)?,
                None => {
                    let mut message = Message::from_reference(
                        discussion.id,
                        MessageKind::Sent,
                        &inbound.reference,
                        inbound.server_timestamp,
                    );
                    message.server_message_id = inbound.server_message_id.clone();
                    message.body = inbound.body.clone();
                    message.mentions = inbound.mentions.clone();
                    self.db.insert_message(&message)?;
                    message
                }
            };

            self.after_message_stored(discussion, out, &mut message)?;
            Ok(Some(message))
        })
    }

    /// Create an outbound message on this device. The sequence number is
    /// consumed in the same transaction as the insert.
    pub fn send_message(
        &self,
        discussion_id: Uuid,
        body: Option<String>,
        mentions: BTreeSet<UserMention>,
    ) -> Result<Outcome<Message>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::SendMessage)?;

            discussion.last_outbound_message_sequence_number += 1;
            let reference = MessageReference {
                sender_identity: discussion.owned_identity,
                sender_sequence_number: discussion.last_outbound_message_sequence_number,
                sender_thread_id: discussion.sender_thread_id,
            };

            let mut message = Message::from_reference(
                discussion.id,
                MessageKind::Sent,
                &reference,
                Utc::now(),
            );
            message.body = body;
            message.mentions = mentions;
            self.db.insert_message(&message)?;

            self.after_message_stored(discussion, out, &mut message)?;
            out.push(DiscussionEvent::OutboundMessageCreated {
                discussion_id: discussion.id,
                message_id: message.id,
            });
            Ok(message)
        })
    }

    /// Record that the owned identity or a contact captured the screen
    /// while sensitive messages were displayed.
    pub fn record_screen_capture(
        &self,
        discussion_id: Uuid,
        capturer: CryptoId,
        server_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Outcome<Message>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::RecordScreenCapture)?;

            let by_owned_identity = capturer == discussion.owned_identity;
            let category = if by_owned_identity {
                SystemMessageCategory::OwnedIdentityDidCaptureSensitiveMessages
            } else {
                SystemMessageCategory::ContactIdentityDidCaptureSensitiveMessages
            };
            let sort_index = self.system_sort_index(discussion, server_timestamp.as_ref())?;
            self.insert_system_message_in(
                discussion,
                out,
                category,
                Some(capturer),
                sort_index,
                by_owned_identity,
            )
        })
    }

    fn ensure_may_post(&self, discussion: &Discussion, sender: &CryptoId) -> Result<()> {
        let allowed = match &discussion.kind {
            DiscussionKind::OneToOne { contact } => contact.as_ref() == Some(sender),
            kind => self.membership.is_active_participant(kind, sender),
        };
        if *sender == discussion.owned_identity || !allowed {
            return Err(SyncError::IdentityMismatch(format!(
                "{} may not post in discussion {}",
                sender.short(),
                discussion.id
            )));
        }
        Ok(())
    }

    /// Refresh the content of a message delivered again. A wiped message
    /// stays wiped.
    fn overwrite(
        &self,
        mut existing: Message,
        inbound: &InboundMessage,
        does_mention: bool,
    ) -> Result<Message> {
        existing.server_message_id = inbound
            .server_message_id
            .clone()
            .or(existing.server_message_id);
        existing.timestamp = inbound.server_timestamp;
        existing.sort_index = sort_index_of(&inbound.server_timestamp);
        if !existing.is_wiped && existing.edited_at.is_none() {
            existing.body = inbound.body.clone();
            existing.mentions = inbound.mentions.clone();
            existing.does_mention_owned_identity = does_mention;
        }
        self.db.update_message(&existing)?;
        tracing::debug!(message_id = %existing.id, "existing message overwritten");
        Ok(existing)
    }

    /// Bookkeeping shared by every received or sent message creation.
    fn after_message_stored(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
        message: &mut Message,
    ) -> Result<()> {
        self.unarchive_in(discussion, out)?;
        touch_last_message(discussion, message.timestamp);
        self.replay_deferred_requests_in(discussion, out, message)?;
        self.update_illustrative_message_in(discussion, message)?;
        self.refresh_counters_in(discussion, out)?;
        Ok(())
    }
}

fn predates_remote_deletion(discussion: &Discussion, server_timestamp: &DateTime<Utc>) -> bool {
    let discarded = discussion
        .server_timestamp_of_last_remote_deletion
        .is_some_and(|deleted_at| *server_timestamp < deleted_at);
    if discarded {
        tracing::info!(
            discussion_id = %discussion.id,
            "discarding message older than the last remote wipe"
        );
    }
    discarded
}
