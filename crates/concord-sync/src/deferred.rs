//! Queue of remote requests whose target message has not arrived yet.
//!
//! Precedence among requests for the same target:
//! - a wipe replaces everything pending,
//! - an edit is dropped behind a pending wipe or a newer pending edit,
//! - a reaction is dropped behind a pending wipe.
//!
//! On replay, wipes go first; if one applies, the rest is moot. Otherwise the
//! remaining requests are applied in arrival order. Everything pending for the
//! target is removed either way.

use chrono::{DateTime, Utc};
use concord_shared::{CryptoId, MessageReference, ReactionRequest, UpdateMessageRequest};
use concord_store::{DeferredRequest, DeferredRequestKind, Discussion, Message};

use crate::engine::DiscussionEngine;
use crate::error::{Result, SyncError};
use crate::events::{
    DiscussionEvent, InfoAboutWipedOrDeletedMessage, Outbox, WipedOrDeletedKind,
};

impl DiscussionEngine<'_> {
    pub(crate) fn defer_wipe(
        &self,
        discussion: &Discussion,
        requester: &CryptoId,
        target: &MessageReference,
        server_timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let replaced = self.db.delete_deferred_requests_for(discussion.id, target)?;
        self.db.insert_deferred_request(&DeferredRequest::new(
            discussion.id,
            *requester,
            DeferredRequestKind::Wipe,
            *target,
            None,
            server_timestamp,
        ))?;
        tracing::debug!(
            discussion_id = %discussion.id,
            sequence_number = target.sender_sequence_number,
            replaced,
            "wipe deferred until its target arrives"
        );
        Ok(())
    }

    /// Returns `false` when the edit was dropped by precedence.
    pub(crate) fn defer_edit(
        &self,
        discussion: &Discussion,
        requester: &CryptoId,
        request: &UpdateMessageRequest,
        server_timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        let target = &request.message_to_edit;
        let pending = self.db.list_deferred_requests_for(discussion.id, target)?;

        let superseded = pending.iter().any(|p| match p.kind {
            DeferredRequestKind::Wipe => true,
            DeferredRequestKind::Edit => p.server_timestamp > server_timestamp,
            DeferredRequestKind::Reaction => false,
        });
        if superseded {
            tracing::debug!(
                discussion_id = %discussion.id,
                "edit dropped, a wipe or a newer edit is already pending"
            );
            return Ok(false);
        }

        self.db.insert_deferred_request(&DeferredRequest::new(
            discussion.id,
            *requester,
            DeferredRequestKind::Edit,
            *target,
            Some(serde_json::to_string(request)?),
            server_timestamp,
        ))?;
        Ok(true)
    }

    /// Returns `false` when a wipe is already pending for the target.
    pub(crate) fn defer_reaction(
        &self,
        discussion: &Discussion,
        requester: &CryptoId,
        request: &ReactionRequest,
        server_timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        let target = &request.message_reference;
        let pending = self.db.list_deferred_requests_for(discussion.id, target)?;

        if pending.iter().any(|p| p.kind == DeferredRequestKind::Wipe) {
            tracing::debug!(
                discussion_id = %discussion.id,
                "reaction dropped, a wipe is already pending"
            );
            return Ok(false);
        }

        self.db.insert_deferred_request(&DeferredRequest::new(
            discussion.id,
            *requester,
            DeferredRequestKind::Reaction,
            *target,
            Some(serde_json::to_string(request)?),
            server_timestamp,
        ))?;
        Ok(true)
    }

    /// Apply and remove every request pending for `message`. Failures are
    /// logged and never retried.
    pub(crate) fn replay_deferred_requests_in(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
        message: &mut Message,
    ) -> Result<()> {
        let Some(reference) = message.reference() else {
            return Ok(());
        };
        let pending = self.db.list_deferred_requests_for(discussion.id, &reference)?;
        if pending.is_empty() {
            return Ok(());
        }
        self.db.delete_deferred_requests_for(discussion.id, &reference)?;

        tracing::debug!(
            discussion_id = %discussion.id,
            message_id = %message.id,
            count = pending.len(),
            "replaying deferred requests"
        );

        let (wipes, others): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|p| p.kind == DeferredRequestKind::Wipe);

        for wipe in &wipes {
            match self.apply_wipe(discussion, message, &wipe.requester) {
                Ok(true) => {
                    out.push(DiscussionEvent::MessagesWipedOrDeleted(vec![
                        InfoAboutWipedOrDeletedMessage {
                            kind: WipedOrDeletedKind::Wiped,
                            discussion_id: discussion.id,
                            message_id: message.id,
                        },
                    ]));
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => log_failed_replay(wipe, &e),
            }
        }

        for request in &others {
            if let Err(e) = self.replay_one(discussion, message, request) {
                log_failed_replay(request, &e);
            }
        }
        Ok(())
    }

    fn replay_one(
        &self,
        discussion: &mut Discussion,
        message: &mut Message,
        request: &DeferredRequest,
    ) -> Result<()> {
        let payload = request.payload.as_deref().ok_or_else(|| {
            SyncError::NotFound(format!("payload of deferred request {}", request.id))
        })?;

        match request.kind {
            DeferredRequestKind::Edit => {
                let edit: UpdateMessageRequest = serde_json::from_str(payload)?;
                self.apply_edit(
                    discussion,
                    message,
                    &edit,
                    &request.requester,
                    request.server_timestamp,
                )?;
            }
            DeferredRequestKind::Reaction => {
                let reaction: ReactionRequest = serde_json::from_str(payload)?;
                self.apply_reaction(
                    message,
                    &request.requester,
                    reaction.emoji.as_deref(),
                    request.server_timestamp,
                    true,
                )?;
            }
            DeferredRequestKind::Wipe => {}
        }
        Ok(())
    }
}

fn log_failed_replay(request: &DeferredRequest, error: &SyncError) {
    tracing::warn!(
        deferred_id = request.id,
        kind = ?request.kind,
        requester = %request.requester.short(),
        error = %error,
        "deferred request could not be applied, dropping it"
    );
}
