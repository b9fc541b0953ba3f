//! Discussion status gate and transitions.

use concord_shared::{DiscussionKind, DiscussionStatus, SystemMessageCategory};
use concord_store::Discussion;
use uuid::Uuid;

use crate::engine::DiscussionEngine;
use crate::error::{GatedOperation, Result, SyncError};
use crate::events::{DiscussionEvent, Outbox, Outcome};

/// The single gate for conversational mutation: only active discussions
/// proceed.
pub(crate) fn ensure_active(discussion: &Discussion, operation: GatedOperation) -> Result<()> {
    match discussion.status {
        DiscussionStatus::Active => Ok(()),
        DiscussionStatus::Locked | DiscussionStatus::PreDiscussion => {
            tracing::debug!(
                discussion_id = %discussion.id,
                status = %discussion.status,
                ?operation,
                "operation refused by status gate"
            );
            Err(SyncError::StatusViolation {
                operation,
                status: discussion.status,
            })
        }
    }
}

impl DiscussionEngine<'_> {
    /// Move the discussion to `new_status`. Deciding when to transition is
    /// up to the caller; this only applies the consequences.
    pub fn set_status(
        &self,
        discussion_id: Uuid,
        new_status: DiscussionStatus,
    ) -> Result<Outcome<bool>> {
        self.transact(discussion_id, |discussion, out| {
            self.set_status_in(discussion, out, new_status)
        })
    }

    pub(crate) fn set_status_in(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
        new_status: DiscussionStatus,
    ) -> Result<bool> {
        let old_status = discussion.status;
        if old_status == new_status {
            return Ok(false);
        }
        discussion.status = new_status;

        tracing::info!(
            discussion_id = %discussion.id,
            from = %old_status,
            to = %new_status,
            "discussion status changed"
        );

        match discussion.kind {
            DiscussionKind::OneToOne { .. } => {
                if old_status == DiscussionStatus::Locked && new_status == DiscussionStatus::Active
                {
                    self.append_system_message(
                        discussion,
                        out,
                        SystemMessageCategory::ContactIsOneToOneAgain,
                    )?;
                }
                if new_status == DiscussionStatus::Locked {
                    self.append_system_message(
                        discussion,
                        out,
                        SystemMessageCategory::ContactWasDeleted,
                    )?;
                }
            }
            DiscussionKind::GroupV1 { .. } | DiscussionKind::GroupV2 { .. } => {
                if new_status == DiscussionStatus::Active {
                    self.append_system_message(
                        discussion,
                        out,
                        SystemMessageCategory::RejoinedGroup,
                    )?;
                }
                if old_status == DiscussionStatus::Active && new_status == DiscussionStatus::Locked
                {
                    self.append_system_message(
                        discussion,
                        out,
                        SystemMessageCategory::NotPartOfTheGroupAnymore,
                    )?;
                    // A later rejoin starts sequence tracking from scratch.
                    self.db.purge_participant_sequence_numbers(discussion.id)?;
                }
            }
        }

        out.push(DiscussionEvent::StatusChanged {
            discussion_id: discussion.id,
            status: new_status,
        });
        self.refresh_counters_in(discussion, out)?;
        Ok(true)
    }

    fn append_system_message(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
        category: SystemMessageCategory,
    ) -> Result<()> {
        let sort_index = self.system_sort_index(discussion, None)?;
        self.insert_system_message_in(discussion, out, category, None, sort_index, false)?;
        Ok(())
    }
}
