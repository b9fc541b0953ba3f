//! Derived counters, illustrative message and list-level housekeeping.
//!
//! Every refresh here recomputes from the store, so it is idempotent and safe
//! to call speculatively after any failure.

use chrono::{DateTime, Utc};
use concord_shared::{CryptoId, MessageKind, SystemMessageCategory};
use concord_store::{Discussion, Message, StoreError};
use uuid::Uuid;

use crate::collaborators::BadgeSink;
use crate::engine::DiscussionEngine;
use crate::error::Result;
use crate::events::{DiscussionEvent, Outbox, Outcome};

/// Where the "new messages" divider belongs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DividerPlacement {
    pub sort_index: f64,
    /// An existing divider marker sitting right before the first new message.
    pub existing_marker: Option<Uuid>,
}

impl DiscussionEngine<'_> {
    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    pub(crate) fn refresh_counters_in(
        &self,
        discussion: &mut Discussion,
        badges: &mut dyn BadgeSink,
    ) -> Result<()> {
        self.refresh_number_of_new_messages_in(discussion, badges)?;
        self.reset_new_received_message_does_mention_owned_identity_in(discussion, badges)?;
        Ok(())
    }

    pub(crate) fn refresh_number_of_new_messages_in(
        &self,
        discussion: &mut Discussion,
        badges: &mut dyn BadgeSink,
    ) -> Result<u64> {
        let fresh = if discussion.is_archived || discussion.is_muted(Utc::now()) {
            0
        } else {
            self.db.count_new_received_messages(discussion.id)?
                + self.db.count_new_relevant_system_messages(discussion.id)?
        };

        let delta = fresh as i64 - discussion.number_of_new_messages as i64;
        discussion.number_of_new_messages = fresh;
        badges.add_to_new_messages(&discussion.owned_identity, delta);
        Ok(fresh)
    }

    pub(crate) fn reset_new_received_message_does_mention_owned_identity_in(
        &self,
        discussion: &mut Discussion,
        badges: &mut dyn BadgeSink,
    ) -> Result<bool> {
        let fresh = self
            .db
            .count_new_received_messages_mentioning_owned_identity(discussion.id)?
            > 0;

        if fresh != discussion.a_new_received_message_does_mention_owned_identity {
            discussion.a_new_received_message_does_mention_owned_identity = fresh;
            // Muted discussions still surface mentions through their own badge.
            if discussion.is_muted(Utc::now()) {
                badges.add_to_mentions(&discussion.owned_identity, if fresh { 1 } else { -1 });
            }
        }
        Ok(fresh)
    }

    pub fn refresh_number_of_new_messages(&self, discussion_id: Uuid) -> Result<Outcome<u64>> {
        self.transact(discussion_id, |discussion, out| {
            self.refresh_number_of_new_messages_in(discussion, out)
        })
    }

    pub fn reset_new_received_message_does_mention_owned_identity_value(
        &self,
        discussion_id: Uuid,
    ) -> Result<Outcome<bool>> {
        self.transact(discussion_id, |discussion, out| {
            self.reset_new_received_message_does_mention_owned_identity_in(discussion, out)
        })
    }

    /// Bootstrap pass over every discussion of an owned identity.
    pub fn refresh_number_of_new_messages_of_all_discussions(
        &self,
        owned_identity: &CryptoId,
    ) -> Result<Outcome<u64>> {
        self.transact_many(|out| {
            let mut total = 0;
            for mut discussion in self.db.list_discussions_for_owned_identity(owned_identity)? {
                self.refresh_counters_in(&mut discussion, out)?;
                self.db.update_discussion(&discussion)?;
                total += discussion.number_of_new_messages;
            }
            Ok(total)
        })
    }

    // -----------------------------------------------------------------------
    // Illustrative message
    // -----------------------------------------------------------------------

    /// Promote `message` if it is eligible and sorts after the current
    /// illustrative message. Never downgrades.
    pub(crate) fn update_illustrative_message_in(
        &self,
        discussion: &mut Discussion,
        message: &Message,
    ) -> Result<()> {
        let eligible = match message.kind {
            MessageKind::Received | MessageKind::Sent => true,
            MessageKind::System => message
                .system_category
                .is_some_and(SystemMessageCategory::is_relevant_for_illustrative_message),
        };
        if !eligible || discussion.illustrative_message_id == Some(message.id) {
            return Ok(());
        }

        let current_sort_index = match discussion.illustrative_message_id {
            Some(id) => match self.db.get_message(id) {
                Ok(current) => Some(current.sort_index),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        if current_sort_index.map_or(true, |current| message.sort_index > current) {
            discussion.illustrative_message_id = Some(message.id);
        }
        Ok(())
    }

    pub(crate) fn reset_illustrative_message_in(&self, discussion: &mut Discussion) -> Result<()> {
        discussion.illustrative_message_id = self
            .db
            .appropriate_illustrative_message(discussion.id)?
            .map(|m| m.id);
        Ok(())
    }

    pub fn reset_illustrative_message(&self, discussion_id: Uuid) -> Result<Outcome<Option<Uuid>>> {
        self.transact(discussion_id, |discussion, _| {
            self.reset_illustrative_message_in(discussion)?;
            Ok(discussion.illustrative_message_id)
        })
    }

    // -----------------------------------------------------------------------
    // New messages divider
    // -----------------------------------------------------------------------

    pub fn new_messages_divider_placement(
        &self,
        discussion_id: Uuid,
    ) -> Result<Option<DividerPlacement>> {
        let first_received = self.db.first_new_received_message(discussion_id)?;
        let first_system = self.db.first_new_relevant_system_message(discussion_id)?;

        let first_new = match (first_received, first_system) {
            (Some(received), Some(system)) => {
                if system.sort_index < received.sort_index {
                    system
                } else {
                    received
                }
            }
            (Some(message), None) | (None, Some(message)) => message,
            (None, None) => return Ok(None),
        };

        let previous = self
            .db
            .message_before_sort_index(discussion_id, first_new.sort_index)?;

        let placement = match previous {
            Some(marker) if marker.is_system(SystemMessageCategory::NumberOfNewMessages) => {
                DividerPlacement {
                    sort_index: marker.sort_index,
                    existing_marker: Some(marker.id),
                }
            }
            Some(previous) => DividerPlacement {
                sort_index: (previous.sort_index + first_new.sort_index) / 2.0,
                existing_marker: None,
            },
            None => DividerPlacement {
                sort_index: (first_new.sort_index - 1.0 + first_new.sort_index) / 2.0,
                existing_marker: None,
            },
        };
        Ok(Some(placement))
    }

    /// Make sure a divider marker sits right before the first new message.
    pub fn insert_new_messages_divider(
        &self,
        discussion_id: Uuid,
    ) -> Result<Outcome<Option<Message>>> {
        self.transact(discussion_id, |discussion, out| {
            match self.new_messages_divider_placement(discussion.id)? {
                None => Ok(None),
                Some(DividerPlacement {
                    existing_marker: Some(marker),
                    ..
                }) => Ok(Some(self.db.get_message(marker)?)),
                Some(DividerPlacement { sort_index, .. }) => self
                    .insert_system_message_in(
                        discussion,
                        out,
                        SystemMessageCategory::NumberOfNewMessages,
                        None,
                        sort_index,
                        true,
                    )
                    .map(Some),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Read state and mute
    // -----------------------------------------------------------------------

    pub fn mark_all_messages_as_not_new(&self, discussion_id: Uuid) -> Result<Outcome<usize>> {
        self.transact(discussion_id, |discussion, out| {
            let marked = self.db.mark_all_messages_not_new(discussion.id)?;
            self.refresh_counters_in(discussion, out)?;
            Ok(marked)
        })
    }

    pub fn mark_received_message_as_not_new(
        &self,
        discussion_id: Uuid,
        message_id: Uuid,
    ) -> Result<Outcome<bool>> {
        self.transact(discussion_id, |discussion, out| {
            let message = self.message_in(discussion, message_id)?;
            if message.kind != MessageKind::Received {
                return Ok(false);
            }
            let marked = self.db.mark_message_not_new(message.id)?;
            self.refresh_counters_in(discussion, out)?;
            Ok(marked)
        })
    }

    pub fn set_mute_until(
        &self,
        discussion_id: Uuid,
        until: Option<DateTime<Utc>>,
    ) -> Result<Outcome<()>> {
        self.transact(discussion_id, |discussion, out| {
            let now = Utc::now();
            let was_muted = discussion.is_muted(now);
            discussion.local_configuration.mute_notifications_until = until;
            let is_muted = discussion.is_muted(now);

            // The mention badge only tracks muted discussions.
            if discussion.a_new_received_message_does_mention_owned_identity
                && was_muted != is_muted
            {
                let delta = if is_muted { 1 } else { -1 };
                out.add_to_mentions(&discussion.owned_identity, delta);
            }
            self.refresh_counters_in(discussion, out)
        })
    }

    // -----------------------------------------------------------------------
    // Archive and pinning
    // -----------------------------------------------------------------------

    pub fn set_archived(&self, discussion_id: Uuid, archived: bool) -> Result<Outcome<bool>> {
        self.transact(discussion_id, |discussion, out| {
            if archived {
                self.archive_in(discussion, out)
            } else {
                self.unarchive_in(discussion, out)
            }
        })
    }

    pub(crate) fn archive_in(&self, discussion: &mut Discussion, out: &mut Outbox) -> Result<bool> {
        if discussion.is_archived {
            return Ok(false);
        }
        self.db.mark_all_messages_not_new(discussion.id)?;
        if discussion.pinned_index.take().is_some() {
            out.push(DiscussionEvent::PinnedIndexChanged {
                discussion_id: discussion.id,
                pinned_index: None,
            });
        }
        discussion.is_archived = true;
        out.push(DiscussionEvent::Archived {
            discussion_id: discussion.id,
        });
        self.refresh_counters_in(discussion, out)?;
        Ok(true)
    }

    pub(crate) fn unarchive_in(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
    ) -> Result<bool> {
        if !discussion.is_archived {
            return Ok(false);
        }
        discussion.is_archived = false;
        self.insert_system_messages_if_discussion_is_empty(discussion, out)?;
        out.push(DiscussionEvent::Unarchived {
            discussion_id: discussion.id,
        });
        self.refresh_counters_in(discussion, out)?;
        Ok(true)
    }

    /// Pin exactly `ordered` (in that order) among the discussions of
    /// `owned_identity`; every other discussion is unpinned.
    pub fn set_pinned_discussions(
        &self,
        owned_identity: &CryptoId,
        ordered: &[Uuid],
    ) -> Result<Outcome<()>> {
        self.transact_many(|out| {
            let discussions = self.db.list_discussions_for_owned_identity(owned_identity)?;

            for id in ordered {
                if !discussions.iter().any(|d| d.id == *id) {
                    tracing::warn!(discussion_id = %id, "cannot pin unknown discussion");
                }
            }

            for mut discussion in discussions {
                let pinned_index = ordered
                    .iter()
                    .position(|id| *id == discussion.id)
                    .map(|p| p as u32);
                if pinned_index == discussion.pinned_index {
                    continue;
                }
                discussion.pinned_index = pinned_index;
                if pinned_index.is_some() {
                    self.unarchive_in(&mut discussion, out)?;
                }
                self.db.update_discussion(&discussion)?;
                out.push(DiscussionEvent::PinnedIndexChanged {
                    discussion_id: discussion.id,
                    pinned_index,
                });
            }
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    pub fn delete_all_locked_discussions_with_no_message(
        &self,
        owned_identity: &CryptoId,
    ) -> Result<Outcome<Vec<Uuid>>> {
        self.transact_many(|out| {
            let ids = self.db.locked_discussion_ids_without_messages(owned_identity)?;
            for id in &ids {
                let mut discussion = self.discussion(*id)?;
                self.refresh_counters_in(&mut discussion, out)?;
                self.db.delete_discussion(*id)?;
                tracing::info!(discussion_id = %id, "deleted empty locked discussion");
                out.push(DiscussionEvent::Deleted { discussion_id: *id });
            }
            Ok(ids)
        })
    }

    /// Drop deferred requests older than the configured retention.
    pub fn purge_expired_deferred_requests(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(retention) = self.config.deferred_request_retention else {
            return Ok(0);
        };
        let purged = self.db.purge_deferred_requests_older_than(&(now - retention))?;
        if purged > 0 {
            tracing::info!(purged, "expired deferred requests purged");
        }
        Ok(purged)
    }
}
