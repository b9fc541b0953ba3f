//! The discussion engine: a transactional view over the store plus the
//! collaborators every operation may consult.
//!
//! Each public operation loads the discussion, runs inside one SQLite
//! transaction, writes the discussion row back and commits. Events and badge
//! deltas are returned in an [`Outcome`] for publication after the commit.

use chrono::{DateTime, Utc};
use concord_shared::{CryptoId, MessageKind, SystemMessageCategory};
use concord_store::{sort_index_of, Database, Discussion, Message, StoreError};
use uuid::Uuid;

use crate::collaborators::MembershipProvider;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{DiscussionEvent, Outbox, Outcome};

pub struct DiscussionEngine<'a> {
    pub(crate) db: &'a Database,
    pub(crate) membership: &'a dyn MembershipProvider,
    pub(crate) config: &'a SyncConfig,
}

impl<'a> DiscussionEngine<'a> {
    pub fn new(
        db: &'a Database,
        membership: &'a dyn MembershipProvider,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            db,
            membership,
            config,
        }
    }

    pub fn database(&self) -> &Database {
        self.db
    }

    pub fn config(&self) -> &SyncConfig {
        self.config
    }

    pub fn discussion(&self, discussion_id: Uuid) -> Result<Discussion> {
        match self.db.get_discussion(discussion_id) {
            Err(StoreError::NotFound) => Err(SyncError::NotFound(format!(
                "discussion {discussion_id}"
            ))),
            other => Ok(other?),
        }
    }

    /// Run `op` against one discussion inside a transaction.
    ///
    /// Any error rolls back every write, so a refused operation leaves no
    /// observable trace.
    pub(crate) fn transact<T>(
        &self,
        discussion_id: Uuid,
        op: impl FnOnce(&mut Discussion, &mut Outbox) -> Result<T>,
    ) -> Result<Outcome<T>> {
        let tx = self.db.transaction()?;
        let mut discussion = self.discussion(discussion_id)?;
        let mut outbox = Outbox::default();

        let value = op(&mut discussion, &mut outbox)?;

        if !outbox.discussion_deleted() {
            self.db.update_discussion(&discussion)?;
        }
        tx.commit().map_err(StoreError::from)?;
        Ok(outbox.into_outcome(value))
    }

    /// Run `op` inside a transaction that may touch several discussions.
    /// The closure is responsible for writing back what it changes.
    pub(crate) fn transact_many<T>(
        &self,
        op: impl FnOnce(&mut Outbox) -> Result<T>,
    ) -> Result<Outcome<T>> {
        let tx = self.db.transaction()?;
        let mut outbox = Outbox::default();
        let value = op(&mut outbox)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(outbox.into_outcome(value))
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Persist a new discussion and its baseline system messages.
    pub fn create_discussion(&self, discussion: Discussion) -> Result<Outcome<Discussion>> {
        self.transact_many(|out| {
            let mut discussion = discussion;
            self.db.insert_discussion(&discussion)?;
            self.insert_system_messages_if_discussion_is_empty(&mut discussion, out)?;
            self.db.update_discussion(&discussion)?;

            tracing::info!(
                discussion_id = %discussion.id,
                owned_identity = %discussion.owned_identity.short(),
                status = %discussion.status,
                "discussion created"
            );
            out.push(DiscussionEvent::Inserted {
                discussion_id: discussion.id,
            });
            Ok(discussion)
        })
    }

    pub fn set_title(&self, discussion_id: Uuid, title: &str) -> Result<Outcome<bool>> {
        self.transact(discussion_id, |discussion, out| {
            if discussion.title == title {
                return Ok(false);
            }
            discussion.title = title.to_string();
            out.push(DiscussionEvent::Renamed {
                discussion_id: discussion.id,
                title: discussion.title.clone(),
            });
            Ok(true)
        })
    }

    // -----------------------------------------------------------------------
    // System messages
    // -----------------------------------------------------------------------

    /// Insert a system message. System messages are accepted whatever the
    /// status of the discussion.
    pub fn insert_system_message(
        &self,
        discussion_id: Uuid,
        category: SystemMessageCategory,
        actor: Option<CryptoId>,
        server_timestamp: Option<DateTime<Utc>>,
        mark_as_read: bool,
    ) -> Result<Outcome<Message>> {
        self.transact(discussion_id, |discussion, out| {
            let sort_index = self.system_sort_index(discussion, server_timestamp.as_ref())?;
            self.insert_system_message_in(discussion, out, category, actor, sort_index, mark_as_read)
        })
    }

    /// Server timestamp when known, otherwise just after the last message.
    pub(crate) fn system_sort_index(
        &self,
        discussion: &Discussion,
        server_timestamp: Option<&DateTime<Utc>>,
    ) -> Result<f64> {
        if let Some(ts) = server_timestamp {
            return Ok(sort_index_of(ts));
        }
        Ok(match self.db.largest_sort_index(discussion.id)? {
            Some(largest) => largest.ceil() + self.config.system_message_spacing,
            None => sort_index_of(&Utc::now()),
        })
    }

    pub(crate) fn insert_system_message_in(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
        category: SystemMessageCategory,
        actor: Option<CryptoId>,
        sort_index: f64,
        mark_as_read: bool,
    ) -> Result<Message> {
        discussion.last_system_message_sequence_number += 1;

        let now = Utc::now();
        let mut message = Message::system(
            discussion.id,
            discussion.last_system_message_sequence_number,
            category,
            actor,
            sort_index,
            now,
        );
        message.is_new = !mark_as_read;
        self.db.insert_message(&message)?;

        tracing::debug!(
            discussion_id = %discussion.id,
            ?category,
            sort_index,
            "system message inserted"
        );

        if category.is_relevant_for_illustrative_message() {
            touch_last_message(discussion, now);
        }
        self.update_illustrative_message_in(discussion, &message)?;
        self.refresh_counters_in(discussion, out)?;
        Ok(message)
    }

    /// Re-create the "end-to-end encrypted" marker, and the shared-settings
    /// marker when ephemeral settings are active, in an empty discussion.
    pub(crate) fn insert_system_messages_if_discussion_is_empty(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
    ) -> Result<()> {
        if self.db.count_messages(discussion.id)? > 0 {
            return Ok(());
        }

        let sort_index = self.system_sort_index(discussion, None)?;
        self.insert_system_message_in(
            discussion,
            out,
            SystemMessageCategory::DiscussionIsEndToEndEncrypted,
            None,
            sort_index,
            true,
        )?;

        if discussion.shared_configuration.is_ephemeral() {
            let sort_index = self.system_sort_index(discussion, None)?;
            self.insert_system_message_in(
                discussion,
                out,
                SystemMessageCategory::UpdatedDiscussionSharedSettings,
                None,
                sort_index,
                true,
            )?;
        }
        Ok(())
    }

    /// Load a message and check it belongs to `discussion`.
    pub(crate) fn message_in(&self, discussion: &Discussion, message_id: Uuid) -> Result<Message> {
        match self.db.get_message(message_id) {
            Ok(message) if message.discussion_id == discussion.id => Ok(message),
            Ok(_) | Err(StoreError::NotFound) => Err(SyncError::NotFound(format!(
                "message {message_id} in discussion {}",
                discussion.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a reference among received messages, then sent ones.
    pub(crate) fn find_received_or_sent(
        &self,
        discussion: &Discussion,
        reference: &concord_shared::MessageReference,
    ) -> Result<Option<Message>> {
        if let Some(found) =
            self.db
                .find_message_by_sender_sequence(discussion.id, MessageKind::Received, reference)?
        {
            return Ok(Some(found));
        }
        Ok(self
            .db
            .find_message_by_sender_sequence(discussion.id, MessageKind::Sent, reference)?)
    }
}

pub(crate) fn touch_last_message(discussion: &mut Discussion, timestamp: DateTime<Utc>) {
    if timestamp > discussion.timestamp_of_last_message {
        discussion.timestamp_of_last_message = timestamp;
    }
}
