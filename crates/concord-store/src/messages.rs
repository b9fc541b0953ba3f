use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use concord_shared::{CryptoId, MessageKind, MessageReference, SystemMessageCategory, UserMention};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::{
    encode_timestamp, not_found, parse_crypto_id, parse_json, parse_timestamp, parse_uuid,
    Database,
};
use crate::error::Result;
use crate::models::Message;

const MESSAGE_COLUMNS: &str = "id, discussion_id, kind, sender_identity, sender_sequence_number,
     sender_thread_id, server_message_id, sort_index, timestamp, body, mentions, mentions_owned,
     is_new, is_wiped, wiped_by, edited_at, system_category, system_actor";

const KIND_RECEIVED: i64 = 0;
const KIND_SENT: i64 = 1;
const KIND_SYSTEM: i64 = 2;

/// SQL list of the system categories matching `keep`, e.g. `(0, 1, 4)`.
fn category_list(keep: fn(SystemMessageCategory) -> bool) -> String {
    let raw: Vec<String> = SystemMessageCategory::ALL
        .iter()
        .filter(|c| keep(**c))
        .map(|c| c.as_i64().to_string())
        .collect();
    format!("({})", raw.join(", "))
}

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let mentions = serde_json::to_string(&message.mentions)?;

        self.conn().execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                message.id.to_string(),
                message.discussion_id.to_string(),
                message.kind.as_i64(),
                message.sender_identity.map(|id| id.to_hex()),
                message.sender_sequence_number as i64,
                message.sender_thread_id.map(|id| id.to_string()),
                message.server_message_id,
                message.sort_index,
                encode_timestamp(&message.timestamp),
                message.body,
                mentions,
                message.does_mention_owned_identity,
                message.is_new,
                message.is_wiped,
                message.wiped_by.map(|id| id.to_hex()),
                message.edited_at.as_ref().map(encode_timestamp),
                message.system_category.map(|c| c.as_i64()),
                message.system_actor.map(|id| id.to_hex()),
            ],
        )?;
        Ok(())
    }

    /// Overwrite the content columns of an existing message, keeping its id,
    /// reference and discussion.
    pub fn update_message(&self, message: &Message) -> Result<bool> {
        let mentions = serde_json::to_string(&message.mentions)?;

        let affected = self.conn().execute(
            "UPDATE messages SET
                server_message_id = ?2, sort_index = ?3, timestamp = ?4, body = ?5,
                mentions = ?6, mentions_owned = ?7, is_new = ?8, is_wiped = ?9,
                wiped_by = ?10, edited_at = ?11
             WHERE id = ?1",
            params![
                message.id.to_string(),
                message.server_message_id,
                message.sort_index,
                encode_timestamp(&message.timestamp),
                message.body,
                mentions,
                message.does_mention_owned_identity,
                message.is_new,
                message.is_wiped,
                message.wiped_by.map(|id| id.to_hex()),
                message.edited_at.as_ref().map(encode_timestamp),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Resolve a received or sent message by its global reference.
    pub fn find_message_by_sender_sequence(
        &self,
        discussion_id: Uuid,
        kind: MessageKind,
        reference: &MessageReference,
    ) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE discussion_id = ?1 AND kind = ?2 AND sender_identity = ?3
                       AND sender_sequence_number = ?4 AND sender_thread_id = ?5"
                ),
                params![
                    discussion_id.to_string(),
                    kind.as_i64(),
                    reference.sender_identity.to_hex(),
                    reference.sender_sequence_number as i64,
                    reference.sender_thread_id.to_string(),
                ],
                row_to_message,
            )
            .optional()?)
    }

    pub fn find_message_by_server_message_id(
        &self,
        discussion_id: Uuid,
        server_message_id: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE discussion_id = ?1 AND server_message_id = ?2
                     LIMIT 1"
                ),
                params![discussion_id.to_string(), server_message_id],
                row_to_message,
            )
            .optional()?)
    }

    /// All messages of a discussion in display order.
    pub fn list_messages(&self, discussion_id: Uuid) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE discussion_id = ?1
             ORDER BY sort_index ASC"
        ))?;

        let rows = stmt.query_map(params![discussion_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Wipe a message in place: the row stays as a placeholder while its
    /// body, mentions and reactions are erased.
    pub fn mark_message_wiped(&self, id: Uuid, wiped_by: Option<&CryptoId>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET
                is_wiped = 1, is_new = 0, body = NULL, mentions = '[]', mentions_owned = 0,
                wiped_by = ?2
             WHERE id = ?1",
            params![id.to_string(), wiped_by.map(|id| id.to_hex())],
        )?;
        self.delete_reactions_for_message(id)?;
        Ok(affected > 0)
    }

    pub fn replace_message_body(
        &self,
        id: Uuid,
        body: Option<&str>,
        mentions: &BTreeSet<UserMention>,
        does_mention_owned_identity: bool,
        edited_at: &DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET body = ?2, mentions = ?3, mentions_owned = ?4, edited_at = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                body,
                serde_json::to_string(mentions)?,
                does_mention_owned_identity,
                encode_timestamp(edited_at),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_all_messages(&self, discussion_id: Uuid) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM messages WHERE discussion_id = ?1",
            params![discussion_id.to_string()],
        )?)
    }

    pub fn message_ids(&self, discussion_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM messages WHERE discussion_id = ?1 ORDER BY sort_index ASC")?;
        let rows = stmt.query_map(params![discussion_id.to_string()], |row| {
            let raw: String = row.get(0)?;
            parse_uuid(0, &raw)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // -- Counting -----------------------------------------------------------

    pub fn count_messages(&self, discussion_id: Uuid) -> Result<u64> {
        self.count_where(discussion_id, "1 = 1")
    }

    pub fn count_new_received_messages(&self, discussion_id: Uuid) -> Result<u64> {
        self.count_where(discussion_id, &format!("kind = {KIND_RECEIVED} AND is_new = 1"))
    }

    pub fn count_new_received_messages_mentioning_owned_identity(
        &self,
        discussion_id: Uuid,
    ) -> Result<u64> {
        self.count_where(
            discussion_id,
            &format!("kind = {KIND_RECEIVED} AND is_new = 1 AND mentions_owned = 1"),
        )
    }

    /// New system messages whose category counts toward the unread badge.
    pub fn count_new_relevant_system_messages(&self, discussion_id: Uuid) -> Result<u64> {
        let categories =
            category_list(SystemMessageCategory::is_relevant_for_counting_unread);
        self.count_where(
            discussion_id,
            &format!("kind = {KIND_SYSTEM} AND is_new = 1 AND system_category IN {categories}"),
        )
    }

    fn count_where(&self, discussion_id: Uuid, filter: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM messages WHERE discussion_id = ?1 AND {filter}"),
            params![discussion_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // -- Ordering -----------------------------------------------------------

    pub fn largest_sort_index(&self, discussion_id: Uuid) -> Result<Option<f64>> {
        Ok(self.conn().query_row(
            "SELECT MAX(sort_index) FROM messages WHERE discussion_id = ?1",
            params![discussion_id.to_string()],
            |row| row.get(0),
        )?)
    }

    /// The message immediately preceding `sort_index`, if any.
    pub fn message_before_sort_index(
        &self,
        discussion_id: Uuid,
        sort_index: f64,
    ) -> Result<Option<Message>> {
        self.first_message_where(
            discussion_id,
            "sort_index < ?2",
            "sort_index DESC",
            Some(sort_index),
        )
    }

    pub fn first_new_received_message(&self, discussion_id: Uuid) -> Result<Option<Message>> {
        self.first_message_where(
            discussion_id,
            &format!("kind = {KIND_RECEIVED} AND is_new = 1"),
            "sort_index ASC",
            None,
        )
    }

    pub fn first_new_relevant_system_message(
        &self,
        discussion_id: Uuid,
    ) -> Result<Option<Message>> {
        let categories =
            category_list(SystemMessageCategory::is_relevant_for_counting_unread);
        self.first_message_where(
            discussion_id,
            &format!("kind = {KIND_SYSTEM} AND is_new = 1 AND system_category IN {categories}"),
            "sort_index ASC",
            None,
        )
    }

    /// The latest message allowed to represent the discussion in previews.
    pub fn appropriate_illustrative_message(
        &self,
        discussion_id: Uuid,
    ) -> Result<Option<Message>> {
        let categories =
            category_list(SystemMessageCategory::is_relevant_for_illustrative_message);
        self.first_message_where(
            discussion_id,
            &format!(
                "(kind IN ({KIND_RECEIVED}, {KIND_SENT})
                  OR (kind = {KIND_SYSTEM} AND system_category IN {categories}))"
            ),
            "sort_index DESC",
            None,
        )
    }

    fn first_message_where(
        &self,
        discussion_id: Uuid,
        filter: &str,
        order: &str,
        bound: Option<f64>,
    ) -> Result<Option<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE discussion_id = ?1 AND {filter}
             ORDER BY {order}
             LIMIT 1"
        );
        let found = match bound {
            Some(bound) => self
                .conn()
                .query_row(&sql, params![discussion_id.to_string(), bound], row_to_message)
                .optional()?,
            None => self
                .conn()
                .query_row(&sql, params![discussion_id.to_string()], row_to_message)
                .optional()?,
        };
        Ok(found)
    }

    // -- Read state ---------------------------------------------------------

    pub fn mark_all_messages_not_new(&self, discussion_id: Uuid) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE messages SET is_new = 0 WHERE discussion_id = ?1 AND is_new = 1",
            params![discussion_id.to_string()],
        )?)
    }

    pub fn mark_message_not_new(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_new = 0 WHERE id = ?1 AND is_new = 1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let discussion_str: String = row.get(1)?;
    let kind_raw: i64 = row.get(2)?;
    let sender: Option<String> = row.get(3)?;
    let thread: Option<String> = row.get(5)?;
    let ts_str: String = row.get(8)?;
    let mentions_str: String = row.get(10)?;
    let wiped_by: Option<String> = row.get(14)?;
    let edited_str: Option<String> = row.get(15)?;
    let category_raw: Option<i64> = row.get(16)?;
    let actor: Option<String> = row.get(17)?;

    let kind = MessageKind::from_i64(kind_raw)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, kind_raw))?;
    let system_category = match category_raw {
        Some(raw) => Some(
            SystemMessageCategory::from_i64(raw)
                .ok_or(rusqlite::Error::IntegralValueOutOfRange(16, raw))?,
        ),
        None => None,
    };

    Ok(Message {
        id: parse_uuid(0, &id_str)?,
        discussion_id: parse_uuid(1, &discussion_str)?,
        kind,
        sender_identity: sender.as_deref().map(|s| parse_crypto_id(3, s)).transpose()?,
        sender_sequence_number: row.get::<_, i64>(4)? as u64,
        sender_thread_id: thread.as_deref().map(|s| parse_uuid(5, s)).transpose()?,
        server_message_id: row.get(6)?,
        sort_index: row.get(7)?,
        timestamp: parse_timestamp(8, &ts_str)?,
        body: row.get(9)?,
        mentions: parse_json(10, &mentions_str)?,
        does_mention_owned_identity: row.get(11)?,
        is_new: row.get(12)?,
        is_wiped: row.get(13)?,
        wiped_by: wiped_by.as_deref().map(|s| parse_crypto_id(14, s)).transpose()?,
        edited_at: edited_str
            .as_deref()
            .map(|s| parse_timestamp(15, s))
            .transpose()?,
        system_category,
        system_actor: actor.as_deref().map(|s| parse_crypto_id(17, s)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use concord_shared::{DiscussionKind, DiscussionStatus};

    use super::*;
    use crate::models::{sort_index_of, Discussion};

    fn setup() -> (Database, Discussion) {
        let db = Database::open_in_memory().unwrap();
        let discussion = Discussion::new(
            CryptoId([1u8; 32]),
            DiscussionKind::OneToOne {
                contact: Some(CryptoId([2u8; 32])),
            },
            DiscussionStatus::Active,
            "Alice",
        );
        db.insert_discussion(&discussion).unwrap();
        (db, discussion)
    }

    fn reference(seq: u64) -> MessageReference {
        MessageReference {
            sender_identity: CryptoId([2u8; 32]),
            sender_sequence_number: seq,
            sender_thread_id: Uuid::from_u128(42),
        }
    }

    fn received(discussion: &Discussion, seq: u64, sort_index: f64) -> Message {
        let mut message = Message::from_reference(
            discussion.id,
            MessageKind::Received,
            &reference(seq),
            Utc::now(),
        );
        message.sort_index = sort_index;
        message.is_new = true;
        message.body = Some(format!("message {seq}"));
        message
    }

    #[test]
    fn find_by_reference_respects_kind() {
        let (db, discussion) = setup();
        let message = received(&discussion, 1, 10.0);
        db.insert_message(&message).unwrap();

        let found = db
            .find_message_by_sender_sequence(discussion.id, MessageKind::Received, &reference(1))
            .unwrap();
        assert_eq!(found.map(|m| m.id), Some(message.id));

        let as_sent = db
            .find_message_by_sender_sequence(discussion.id, MessageKind::Sent, &reference(1))
            .unwrap();
        assert!(as_sent.is_none());
    }

    #[test]
    fn wiping_clears_content_and_reactions() {
        let (db, discussion) = setup();
        let message = received(&discussion, 1, 10.0);
        db.insert_message(&message).unwrap();
        db.set_reaction(message.id, &CryptoId([5u8; 32]), "👍", &Utc::now())
            .unwrap();

        assert!(db.mark_message_wiped(message.id, None).unwrap());

        let wiped = db.get_message(message.id).unwrap();
        assert!(wiped.is_wiped);
        assert!(!wiped.is_new);
        assert_eq!(wiped.body, None);
        assert!(db.get_reactions_for_message(message.id).unwrap().is_empty());
    }

    #[test]
    fn counts_only_relevant_new_messages() {
        let (db, discussion) = setup();
        db.insert_message(&received(&discussion, 1, 10.0)).unwrap();
        db.insert_message(&received(&discussion, 2, 11.0)).unwrap();

        let mut relevant = Message::system(
            discussion.id,
            1,
            SystemMessageCategory::ContactJoinedGroup,
            None,
            12.0,
            Utc::now(),
        );
        relevant.is_new = true;
        db.insert_message(&relevant).unwrap();

        let mut irrelevant = Message::system(
            discussion.id,
            2,
            SystemMessageCategory::CallLogItem,
            None,
            13.0,
            Utc::now(),
        );
        irrelevant.is_new = true;
        db.insert_message(&irrelevant).unwrap();

        assert_eq!(db.count_new_received_messages(discussion.id).unwrap(), 2);
        assert_eq!(db.count_new_relevant_system_messages(discussion.id).unwrap(), 1);
        assert_eq!(db.count_messages(discussion.id).unwrap(), 4);

        assert_eq!(db.mark_all_messages_not_new(discussion.id).unwrap(), 4);
        assert_eq!(db.count_new_received_messages(discussion.id).unwrap(), 0);
    }

    #[test]
    fn illustrative_skips_encryption_marker() {
        let (db, discussion) = setup();
        db.insert_message(&received(&discussion, 1, 10.0)).unwrap();
        db.insert_message(&Message::system(
            discussion.id,
            1,
            SystemMessageCategory::DiscussionIsEndToEndEncrypted,
            None,
            20.0,
            Utc::now(),
        ))
        .unwrap();

        let illustrative = db.appropriate_illustrative_message(discussion.id).unwrap();
        assert_eq!(illustrative.map(|m| m.sort_index), Some(10.0));
        assert_eq!(db.largest_sort_index(discussion.id).unwrap(), Some(20.0));
    }

    #[test]
    fn message_before_sort_index_picks_closest() {
        let (db, discussion) = setup();
        for (seq, idx) in [(1, 1.0), (2, 2.0), (3, 3.0)] {
            db.insert_message(&received(&discussion, seq, idx)).unwrap();
        }
        let before = db.message_before_sort_index(discussion.id, 3.0).unwrap();
        assert_eq!(before.map(|m| m.sort_index), Some(2.0));
        assert!(db
            .message_before_sort_index(discussion.id, 1.0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn replace_body_records_edit() {
        let (db, discussion) = setup();
        let message = received(&discussion, 1, 10.0);
        db.insert_message(&message).unwrap();
        let mentions = BTreeSet::from([UserMention {
            mentioned_identity: CryptoId([1u8; 32]),
            range_start: 0,
            range_end: 3,
        }]);
        let edited_at = Utc::now();

        db.replace_message_body(message.id, Some("new"), &mentions, true, &edited_at)
            .unwrap();

        let edited = db.get_message(message.id).unwrap();
        assert_eq!(edited.body.as_deref(), Some("new"));
        assert_eq!(edited.mentions, mentions);
        assert!(edited.does_mention_owned_identity);
        assert!(edited.edited_at.is_some());
        assert_eq!(
            db.count_new_received_messages_mentioning_owned_identity(discussion.id)
                .unwrap(),
            1
        );
    }

    #[test]
    fn sort_index_is_seconds_since_epoch() {
        let ts = DateTime::parse_from_rfc3339("1970-01-01T00:00:01.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(sort_index_of(&ts), 1.5);
    }
}
