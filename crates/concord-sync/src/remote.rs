//! Wipe, edit and reaction requests, remote and local.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use concord_shared::{
    CryptoId, DeleteMessagesRequest, DiscussionKind, MessageKind, MessageReference,
    ReactionRequest, UpdateMessageRequest, UserMention,
};
use concord_store::{Discussion, Message};
use uuid::Uuid;

use crate::engine::DiscussionEngine;
use crate::error::{invariant_violation, GatedOperation, Result, SyncError};
use crate::events::{
    DiscussionEvent, InfoAboutWipedOrDeletedMessage, Outcome, WipedOrDeletedKind,
};
use crate::status::ensure_active;

impl DiscussionEngine<'_> {
    // -----------------------------------------------------------------------
    // Wipe
    // -----------------------------------------------------------------------

    /// Wipe a batch of messages. Each reference is handled on its own: a
    /// failing item is logged and skipped, unresolved ones are deferred.
    pub fn process_wipe_message_request(
        &self,
        discussion_id: Uuid,
        request: &DeleteMessagesRequest,
        requester: CryptoId,
        server_timestamp: DateTime<Utc>,
    ) -> Result<Outcome<Vec<InfoAboutWipedOrDeletedMessage>>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::WipeMessages)?;

            let mut infos = Vec::new();
            for reference in &request.messages_to_delete {
                match self.wipe_one(discussion, reference, &requester, server_timestamp) {
                    Ok(Some(info)) => infos.push(info),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            discussion_id = %discussion.id,
                            requester = %requester.short(),
                            sequence_number = reference.sender_sequence_number,
                            error = %e,
                            "skipping message in wipe request"
                        );
                    }
                }
            }

            if !infos.is_empty() {
                out.push(DiscussionEvent::MessagesWipedOrDeleted(infos.clone()));
                self.refresh_counters_in(discussion, out)?;
            }
            Ok(infos)
        })
    }

    fn wipe_one(
        &self,
        discussion: &Discussion,
        reference: &MessageReference,
        requester: &CryptoId,
        server_timestamp: DateTime<Utc>,
    ) -> Result<Option<InfoAboutWipedOrDeletedMessage>> {
        // Decided by the author in the reference, not by the requester.
        let kind = if reference.sender_identity == discussion.owned_identity {
            MessageKind::Sent
        } else {
            MessageKind::Received
        };

        // Refused wipes are never deferred.
        self.ensure_may_wipe(discussion, Some(&reference.sender_identity), requester)?;

        let Some(mut message) =
            self.db
                .find_message_by_sender_sequence(discussion.id, kind, reference)?
        else {
            self.defer_wipe(discussion, requester, reference, server_timestamp)?;
            return Ok(None);
        };

        if !self.apply_wipe(discussion, &mut message, requester)? {
            return Ok(None);
        }
        Ok(Some(InfoAboutWipedOrDeletedMessage {
            kind: WipedOrDeletedKind::Wiped,
            discussion_id: discussion.id,
            message_id: message.id,
        }))
    }

    /// Returns `false` if the message was already wiped.
    pub(crate) fn apply_wipe(
        &self,
        discussion: &Discussion,
        message: &mut Message,
        requester: &CryptoId,
    ) -> Result<bool> {
        if message.is_wiped {
            return Ok(false);
        }

        let moderated =
            self.ensure_may_wipe(discussion, message.sender_identity.as_ref(), requester)?;
        let wiped_by = moderated.then_some(*requester);
        self.db.mark_message_wiped(message.id, wiped_by.as_ref())?;

        message.is_wiped = true;
        message.is_new = false;
        message.body = None;
        message.mentions.clear();
        message.does_mention_owned_identity = false;
        message.wiped_by = wiped_by;

        tracing::debug!(
            discussion_id = %discussion.id,
            message_id = %message.id,
            requester = %requester.short(),
            "message wiped"
        );
        Ok(true)
    }

    /// The author and the owned identity may wipe a message; in group v2 so
    /// may members allowed to remote-delete anything. Returns `true` when the
    /// wipe relies on that last right.
    fn ensure_may_wipe(
        &self,
        discussion: &Discussion,
        author: Option<&CryptoId>,
        requester: &CryptoId,
    ) -> Result<bool> {
        if author == Some(requester) || *requester == discussion.owned_identity {
            return Ok(false);
        }
        let may_delete_anything = match &discussion.kind {
            DiscussionKind::GroupV2 { group: Some(group) } => {
                self.membership.may_remote_delete_anything(group, requester)
            }
            _ => false,
        };
        if !may_delete_anything {
            return Err(SyncError::NotPermitted(format!(
                "{} may not wipe messages of {}",
                requester.short(),
                author.map_or_else(|| "nobody".to_string(), |a| a.short())
            )));
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Edit
    // -----------------------------------------------------------------------

    /// Apply an edit sent by a contact (received messages only) or by
    /// another device of the owned identity (sent messages only).
    pub fn process_update_message_request(
        &self,
        discussion_id: Uuid,
        request: &UpdateMessageRequest,
        requester: CryptoId,
        server_timestamp: DateTime<Utc>,
    ) -> Result<Outcome<Option<Message>>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::UpdateMessage)?;

            let kind = if requester == discussion.owned_identity {
                MessageKind::Sent
            } else {
                MessageKind::Received
            };

            let Some(mut message) = self.db.find_message_by_sender_sequence(
                discussion.id,
                kind,
                &request.message_to_edit,
            )?
            else {
                self.defer_edit(discussion, &requester, request, server_timestamp)?;
                return Ok(None);
            };

            self.apply_edit(discussion, &mut message, request, &requester, server_timestamp)?;
            self.refresh_counters_in(discussion, out)?;
            Ok(Some(message))
        })
    }

    /// Returns `false` when the edit is ignored (wiped target, or older than
    /// the last applied edit).
    pub(crate) fn apply_edit(
        &self,
        discussion: &Discussion,
        message: &mut Message,
        request: &UpdateMessageRequest,
        requester: &CryptoId,
        server_timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        match message.kind {
            MessageKind::Received => {
                if message.sender_identity.as_ref() != Some(requester) {
                    return Err(SyncError::IdentityMismatch(format!(
                        "{} is not the author of message {}",
                        requester.short(),
                        message.id
                    )));
                }
            }
            MessageKind::Sent => {
                if *requester != discussion.owned_identity {
                    return Err(SyncError::IdentityMismatch(format!(
                        "{} cannot edit a message sent by the owned identity",
                        requester.short()
                    )));
                }
            }
            MessageKind::System => {
                return Err(invariant_violation(format!(
                    "edit resolved to system message {}",
                    message.id
                )));
            }
        }

        if message.is_wiped {
            tracing::debug!(message_id = %message.id, "ignoring edit of a wiped message");
            return Ok(false);
        }
        if message.edited_at.is_some_and(|at| at > server_timestamp) {
            tracing::debug!(message_id = %message.id, "ignoring edit older than the current one");
            return Ok(false);
        }

        let does_mention = message.kind == MessageKind::Received
            && request
                .user_mentions
                .iter()
                .any(|m| m.mentioned_identity == discussion.owned_identity);

        self.db.replace_message_body(
            message.id,
            request.new_text_body.as_deref(),
            &request.user_mentions,
            does_mention,
            &server_timestamp,
        )?;

        message.body = request.new_text_body.clone();
        message.mentions = request.user_mentions.clone();
        message.does_mention_owned_identity = does_mention;
        message.edited_at = Some(server_timestamp);
        Ok(true)
    }

    /// Edit, from this device, a message the owned identity sent.
    pub fn process_local_update_message_request(
        &self,
        discussion_id: Uuid,
        message_id: Uuid,
        new_text_body: Option<String>,
        user_mentions: BTreeSet<UserMention>,
    ) -> Result<Outcome<Message>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::LocalUpdateMessage)?;

            let mut message = self.message_in(discussion, message_id)?;
            if message.kind != MessageKind::Sent {
                return Err(SyncError::NotPermitted(
                    "only sent messages can be edited".into(),
                ));
            }
            if message.is_wiped {
                return Err(SyncError::NotPermitted("cannot edit a wiped message".into()));
            }
            let Some(reference) = message.reference() else {
                return Err(invariant_violation(format!(
                    "sent message {} has no reference",
                    message.id
                )));
            };

            let request = UpdateMessageRequest {
                message_to_edit: reference,
                new_text_body,
                user_mentions,
            };
            let owned = discussion.owned_identity;
            self.apply_edit(discussion, &mut message, &request, &owned, Utc::now())?;

            out.push(DiscussionEvent::MessageEditShouldBeSent {
                discussion_id: discussion.id,
                request,
            });
            Ok(message)
        })
    }

    // -----------------------------------------------------------------------
    // Reactions
    // -----------------------------------------------------------------------

    /// Apply a reaction sent by a contact or another owned device. The
    /// target may be a received or a sent message.
    pub fn process_set_or_update_reaction_on_message_request(
        &self,
        discussion_id: Uuid,
        request: &ReactionRequest,
        requester: CryptoId,
        server_timestamp: DateTime<Utc>,
        override_existing: bool,
    ) -> Result<Outcome<Option<Message>>> {
        self.transact(discussion_id, |discussion, _| {
            ensure_active(discussion, GatedOperation::SetReaction)?;

            let Some(message) = self.find_received_or_sent(discussion, &request.message_reference)?
            else {
                self.defer_reaction(discussion, &requester, request, server_timestamp)?;
                return Ok(None);
            };

            self.apply_reaction(
                &message,
                &requester,
                request.emoji.as_deref(),
                server_timestamp,
                override_existing,
            )?;
            Ok(Some(message))
        })
    }

    /// Returns `false` when ignored: wiped target, or an existing reaction
    /// newer than this one while `override_existing` is off.
    pub(crate) fn apply_reaction(
        &self,
        message: &Message,
        reactor: &CryptoId,
        emoji: Option<&str>,
        timestamp: DateTime<Utc>,
        override_existing: bool,
    ) -> Result<bool> {
        if message.is_wiped {
            return Ok(false);
        }
        if !override_existing {
            if let Some(existing) = self.db.get_reaction(message.id, reactor)? {
                if existing.timestamp > timestamp {
                    return Ok(false);
                }
            }
        }

        match emoji {
            Some(emoji) => {
                self.db.set_reaction(message.id, reactor, emoji, &timestamp)?;
            }
            None => {
                self.db.remove_reaction(message.id, reactor)?;
            }
        }
        Ok(true)
    }

    /// React, from this device, to a received or sent message.
    pub fn process_set_or_update_reaction_local_request(
        &self,
        discussion_id: Uuid,
        message_id: Uuid,
        emoji: Option<String>,
    ) -> Result<Outcome<bool>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::LocalReaction)?;

            let message = self.message_in(discussion, message_id)?;
            if message.is_wiped {
                return Err(SyncError::NotPermitted(
                    "cannot react to a wiped message".into(),
                ));
            }
            let Some(reference) = message.reference() else {
                return Err(SyncError::NotPermitted(
                    "cannot react to a system message".into(),
                ));
            };

            let owned = discussion.owned_identity;
            let applied =
                self.apply_reaction(&message, &owned, emoji.as_deref(), Utc::now(), true)?;
            if applied {
                out.push(DiscussionEvent::ReactionShouldBeSent {
                    discussion_id: discussion.id,
                    request: ReactionRequest {
                        message_reference: reference,
                        emoji,
                    },
                });
            }
            Ok(applied)
        })
    }
}
