//! Bulk wipes and deletions of messages and discussions.

use chrono::{DateTime, Utc};
use concord_shared::{
    CryptoId, DeletionType, DiscussionKind, DiscussionStatus, MessageKind, SystemMessageCategory,
};
use concord_store::{Discussion, Message};
use uuid::Uuid;

use crate::engine::DiscussionEngine;
use crate::error::{GatedOperation, Result, SyncError};
use crate::events::{
    DiscussionEvent, InfoAboutWipedOrDeletedMessage, Outbox, Outcome, WipedOrDeletedKind,
};
use crate::status::ensure_active;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscussionDeletionOutcome {
    /// Messages cleared, discussion kept and archived.
    Archived,
    /// Discussion removed from the store.
    Deleted,
}

impl DiscussionEngine<'_> {
    /// A contact or another owned device asks to clear the whole discussion.
    pub fn process_remote_request_to_wipe_all_messages_within_this_discussion(
        &self,
        discussion_id: Uuid,
        requester: CryptoId,
        server_timestamp: DateTime<Utc>,
    ) -> Result<Outcome<Vec<InfoAboutWipedOrDeletedMessage>>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::WipeAllMessages)?;

            let by_owned_identity = requester == discussion.owned_identity;
            let allowed = by_owned_identity
                || match &discussion.kind {
                    DiscussionKind::GroupV2 { group: Some(group) } => {
                        self.membership.may_remote_delete_anything(group, &requester)
                    }
                    _ => false,
                };
            if !allowed {
                return Err(SyncError::NotPermitted(format!(
                    "{} may not wipe discussion {}",
                    requester.short(),
                    discussion.id
                )));
            }

            // Late messages sent before this point are discarded on arrival.
            discussion.server_timestamp_of_last_remote_deletion = Some(
                discussion
                    .server_timestamp_of_last_remote_deletion
                    .map_or(server_timestamp, |previous| previous.max(server_timestamp)),
            );

            let infos = self.clear_all_messages_in(discussion, out)?;
            self.insert_system_messages_if_discussion_is_empty(discussion, out)?;
            let sort_index = self.system_sort_index(discussion, None)?;
            self.insert_system_message_in(
                discussion,
                out,
                SystemMessageCategory::DiscussionWasRemotelyWiped,
                Some(requester),
                sort_index,
                by_owned_identity,
            )?;

            tracing::info!(
                discussion_id = %discussion.id,
                requester = %requester.short(),
                removed = infos.len(),
                "discussion remotely wiped"
            );
            Ok(infos)
        })
    }

    /// Delete the discussion as requested on this device. Active and
    /// pre-discussions are emptied and archived; locked ones are removed.
    pub fn process_discussion_deletion_request_from_current_device(
        &self,
        discussion_id: Uuid,
        deletion_type: DeletionType,
    ) -> Result<Outcome<DiscussionDeletionOutcome>> {
        self.transact(discussion_id, |discussion, out| {
            if deletion_type.is_global() {
                ensure_active(discussion, GatedOperation::DeleteDiscussionGlobally)?;
                if let DiscussionKind::OneToOne { .. } = discussion.kind {
                    match deletion_type {
                        DeletionType::FromThisDeviceOnly => {}
                        DeletionType::FromAllOwnedDevices => {
                            self.ensure_another_reachable_device(discussion)?;
                        }
                        DeletionType::FromAllOwnedDevicesAndAllContactDevices => {
                            return Err(SyncError::NotPermitted(
                                "a one-to-one discussion cannot be deleted on contact devices"
                                    .into(),
                            ));
                        }
                    }
                }
                out.push(DiscussionEvent::DiscussionDeletionShouldBePropagated {
                    discussion_id: discussion.id,
                    deletion_type,
                });
            }

            self.clear_all_messages_in(discussion, out)?;

            match discussion.status {
                DiscussionStatus::Locked => {
                    self.refresh_counters_in(discussion, out)?;
                    self.db.delete_discussion(discussion.id)?;
                    out.mark_discussion_deleted();
                    out.push(DiscussionEvent::Deleted {
                        discussion_id: discussion.id,
                    });
                    tracing::info!(discussion_id = %discussion.id, "discussion deleted");
                    Ok(DiscussionDeletionOutcome::Deleted)
                }
                DiscussionStatus::Active | DiscussionStatus::PreDiscussion => {
                    self.insert_system_messages_if_discussion_is_empty(discussion, out)?;
                    self.archive_in(discussion, out)?;
                    tracing::info!(discussion_id = %discussion.id, "discussion cleared and archived");
                    Ok(DiscussionDeletionOutcome::Archived)
                }
            }
        })
    }

    /// Delete messages as requested on this device.
    pub fn process_message_deletion_request_requested_from_current_device(
        &self,
        discussion_id: Uuid,
        message_ids: &[Uuid],
        deletion_type: DeletionType,
    ) -> Result<Outcome<Vec<InfoAboutWipedOrDeletedMessage>>> {
        self.transact(discussion_id, |discussion, out| {
            if deletion_type.is_global() {
                ensure_active(discussion, GatedOperation::DeleteMessagesGlobally)?;
            }

            let messages = message_ids
                .iter()
                .map(|id| self.message_in(discussion, *id))
                .collect::<Result<Vec<_>>>()?;

            match deletion_type {
                DeletionType::FromThisDeviceOnly => {}
                DeletionType::FromAllOwnedDevices => {
                    self.ensure_another_reachable_device(discussion)?;
                }
                DeletionType::FromAllOwnedDevicesAndAllContactDevices => {
                    self.ensure_may_delete_for_everyone(discussion, &messages)?;
                }
            }

            if deletion_type.is_global() {
                out.push(DiscussionEvent::MessageDeletionShouldBePropagated {
                    discussion_id: discussion.id,
                    references: messages.iter().filter_map(Message::reference).collect(),
                    deletion_type,
                });
            }

            let mut infos = Vec::with_capacity(messages.len());
            let mut illustrative_deleted = false;
            for message in &messages {
                self.db.delete_message(message.id)?;
                illustrative_deleted |= discussion.illustrative_message_id == Some(message.id);
                infos.push(InfoAboutWipedOrDeletedMessage {
                    kind: WipedOrDeletedKind::Deleted,
                    discussion_id: discussion.id,
                    message_id: message.id,
                });
            }

            if illustrative_deleted {
                self.reset_illustrative_message_in(discussion)?;
            }
            if !infos.is_empty() {
                out.push(DiscussionEvent::MessagesWipedOrDeleted(infos.clone()));
            }
            self.refresh_counters_in(discussion, out)?;
            Ok(infos)
        })
    }

    /// Remove every message and pending request of the discussion.
    fn clear_all_messages_in(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
    ) -> Result<Vec<InfoAboutWipedOrDeletedMessage>> {
        let infos: Vec<_> = self
            .db
            .message_ids(discussion.id)?
            .into_iter()
            .map(|message_id| InfoAboutWipedOrDeletedMessage {
                kind: WipedOrDeletedKind::Deleted,
                discussion_id: discussion.id,
                message_id,
            })
            .collect();

        self.db.delete_all_messages(discussion.id)?;
        self.db.delete_all_deferred_requests(discussion.id)?;
        discussion.illustrative_message_id = None;

        if !infos.is_empty() {
            out.push(DiscussionEvent::MessagesWipedOrDeleted(infos.clone()));
        }
        Ok(infos)
    }

    fn ensure_another_reachable_device(&self, discussion: &Discussion) -> Result<()> {
        if self
            .membership
            .owned_identity_has_another_reachable_device(&discussion.owned_identity)
        {
            Ok(())
        } else {
            Err(SyncError::NotPermitted(
                "the owned identity has no other reachable device".into(),
            ))
        }
    }

    /// Only our own messages may be deleted for everyone, unless a group v2
    /// grants the owned identity the right to delete anything.
    fn ensure_may_delete_for_everyone(
        &self,
        discussion: &Discussion,
        messages: &[Message],
    ) -> Result<()> {
        let may_delete_anything = match &discussion.kind {
            DiscussionKind::GroupV2 { group: Some(group) } => self
                .membership
                .may_remote_delete_anything(group, &discussion.owned_identity),
            _ => false,
        };

        for message in messages {
            let allowed = match message.kind {
                MessageKind::Sent => true,
                MessageKind::Received => may_delete_anything,
                MessageKind::System => false,
            };
            if !allowed {
                return Err(SyncError::NotPermitted(format!(
                    "message {} cannot be deleted for everyone",
                    message.id
                )));
            }
        }
        Ok(())
    }
}
