use concord_shared::{CryptoId, DiscussionKind, DiscussionStatus, SharedConfiguration};
use rusqlite::params;
use uuid::Uuid;

use crate::database::{
    conversion_error, encode_timestamp, not_found, parse_crypto_id, parse_json, parse_timestamp,
    parse_uuid, Database,
};
use crate::error::Result;
use crate::models::Discussion;

const DISCUSSION_COLUMNS: &str = "id, owned_identity, kind, counterpart, status, title,
     shared_config_version, shared_expiration, local_configuration, sender_thread_id,
     last_outbound_seq, last_system_seq, number_of_new_messages, new_message_mentions_owned,
     illustrative_message_id, pinned_index, is_archived, timestamp_of_last_message,
     last_remote_deletion_at, created_at";

impl Database {
    pub fn insert_discussion(&self, discussion: &Discussion) -> Result<()> {
        let shared_expiration = serde_json::to_string(&discussion.shared_configuration.expiration)?;
        let local_configuration = serde_json::to_string(&discussion.local_configuration)?;

        self.conn().execute(
            &format!(
                "INSERT INTO discussions ({DISCUSSION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
            ),
            params![
                discussion.id.to_string(),
                discussion.owned_identity.to_hex(),
                discussion.kind.tag(),
                discussion.kind.counterpart_hex(),
                discussion.status.as_i64(),
                discussion.title,
                discussion.shared_configuration.version.map(|v| v as i64),
                shared_expiration,
                local_configuration,
                discussion.sender_thread_id.to_string(),
                discussion.last_outbound_message_sequence_number as i64,
                discussion.last_system_message_sequence_number as i64,
                discussion.number_of_new_messages as i64,
                discussion.a_new_received_message_does_mention_owned_identity,
                discussion.illustrative_message_id.map(|id| id.to_string()),
                discussion.pinned_index,
                discussion.is_archived,
                encode_timestamp(&discussion.timestamp_of_last_message),
                discussion
                    .server_timestamp_of_last_remote_deletion
                    .as_ref()
                    .map(encode_timestamp),
                encode_timestamp(&discussion.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_discussion(&self, id: Uuid) -> Result<Discussion> {
        self.conn()
            .query_row(
                &format!("SELECT {DISCUSSION_COLUMNS} FROM discussions WHERE id = ?1"),
                params![id.to_string()],
                row_to_discussion,
            )
            .map_err(not_found)
    }

    /// Write back every mutable column of the discussion. The kind and the
    /// owned identity are fixed at creation and never rewritten, except for the
    /// counterpart which may vanish.
    pub fn update_discussion(&self, discussion: &Discussion) -> Result<bool> {
        let shared_expiration = serde_json::to_string(&discussion.shared_configuration.expiration)?;
        let local_configuration = serde_json::to_string(&discussion.local_configuration)?;

        let affected = self.conn().execute(
            "UPDATE discussions SET
                counterpart = ?2, status = ?3, title = ?4, shared_config_version = ?5,
                shared_expiration = ?6, local_configuration = ?7, last_outbound_seq = ?8,
                last_system_seq = ?9, number_of_new_messages = ?10,
                new_message_mentions_owned = ?11, illustrative_message_id = ?12,
                pinned_index = ?13, is_archived = ?14, timestamp_of_last_message = ?15,
                last_remote_deletion_at = ?16
             WHERE id = ?1",
            params![
                discussion.id.to_string(),
                discussion.kind.counterpart_hex(),
                discussion.status.as_i64(),
                discussion.title,
                discussion.shared_configuration.version.map(|v| v as i64),
                shared_expiration,
                local_configuration,
                discussion.last_outbound_message_sequence_number as i64,
                discussion.last_system_message_sequence_number as i64,
                discussion.number_of_new_messages as i64,
                discussion.a_new_received_message_does_mention_owned_identity,
                discussion.illustrative_message_id.map(|id| id.to_string()),
                discussion.pinned_index,
                discussion.is_archived,
                encode_timestamp(&discussion.timestamp_of_last_message),
                discussion
                    .server_timestamp_of_last_remote_deletion
                    .as_ref()
                    .map(encode_timestamp),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_discussion(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM discussions WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// All discussions of an owned identity, pinned first (by pinned index),
    /// then most recent activity first.
    pub fn list_discussions_for_owned_identity(
        &self,
        owned_identity: &CryptoId,
    ) -> Result<Vec<Discussion>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {DISCUSSION_COLUMNS} FROM discussions
             WHERE owned_identity = ?1
             ORDER BY pinned_index IS NULL, pinned_index ASC, timestamp_of_last_message DESC"
        ))?;

        let rows = stmt.query_map(params![owned_identity.to_hex()], row_to_discussion)?;

        let mut discussions = Vec::new();
        for row in rows {
            discussions.push(row?);
        }
        Ok(discussions)
    }

    /// Ids of the locked discussions of an owned identity that hold no
    /// message at all.
    pub fn locked_discussion_ids_without_messages(
        &self,
        owned_identity: &CryptoId,
    ) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT d.id FROM discussions d
             WHERE d.owned_identity = ?1 AND d.status = ?2
               AND NOT EXISTS (SELECT 1 FROM messages m WHERE m.discussion_id = d.id)",
        )?;

        let rows = stmt.query_map(
            params![owned_identity.to_hex(), DiscussionStatus::Locked.as_i64()],
            |row| {
                let raw: String = row.get(0)?;
                parse_uuid(0, &raw)
            },
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

fn row_to_discussion(row: &rusqlite::Row<'_>) -> rusqlite::Result<Discussion> {
    let id_str: String = row.get(0)?;
    let owned_hex: String = row.get(1)?;
    let kind_tag: i64 = row.get(2)?;
    let counterpart: Option<String> = row.get(3)?;
    let status_raw: i64 = row.get(4)?;
    let shared_version: Option<i64> = row.get(6)?;
    let shared_expiration: String = row.get(7)?;
    let local_configuration: String = row.get(8)?;
    let thread_str: String = row.get(9)?;
    let illustrative: Option<String> = row.get(14)?;
    let last_message_str: String = row.get(17)?;
    let last_deletion_str: Option<String> = row.get(18)?;
    let created_str: String = row.get(19)?;

    let kind = DiscussionKind::from_parts(kind_tag, counterpart.as_deref())
        .map_err(|e| conversion_error(2, e))?;
    let status = DiscussionStatus::from_i64(status_raw)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, status_raw))?;

    Ok(Discussion {
        id: parse_uuid(0, &id_str)?,
        owned_identity: parse_crypto_id(1, &owned_hex)?,
        kind,
        status,
        title: row.get(5)?,
        shared_configuration: SharedConfiguration {
            version: shared_version.map(|v| v as u64),
            expiration: parse_json(7, &shared_expiration)?,
        },
        local_configuration: parse_json(8, &local_configuration)?,
        sender_thread_id: parse_uuid(9, &thread_str)?,
        last_outbound_message_sequence_number: row.get::<_, i64>(10)? as u64,
        last_system_message_sequence_number: row.get::<_, i64>(11)? as u64,
        number_of_new_messages: row.get::<_, i64>(12)? as u64,
        a_new_received_message_does_mention_owned_identity: row.get(13)?,
        illustrative_message_id: illustrative
            .as_deref()
            .map(|raw| parse_uuid(14, raw))
            .transpose()?,
        pinned_index: row.get(15)?,
        is_archived: row.get(16)?,
        timestamp_of_last_message: parse_timestamp(17, &last_message_str)?,
        server_timestamp_of_last_remote_deletion: last_deletion_str
            .as_deref()
            .map(|raw| parse_timestamp(18, raw))
            .transpose()?,
        created_at: parse_timestamp(19, &created_str)?,
    })
}
