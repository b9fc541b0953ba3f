use chrono::{DateTime, Utc};
use concord_shared::CryptoId;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::{encode_timestamp, parse_crypto_id, parse_timestamp, parse_uuid, Database};
use crate::error::Result;
use crate::models::Reaction;

impl Database {
    /// Set the reaction of `reactor` on a message, replacing any previous one.
    pub fn set_reaction(
        &self,
        message_id: Uuid,
        reactor: &CryptoId,
        emoji: &str,
        timestamp: &DateTime<Utc>,
    ) -> Result<Reaction> {
        let id = Uuid::new_v4();

        self.conn().execute(
            "INSERT INTO reactions (id, message_id, reactor, emoji, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (message_id, reactor)
             DO UPDATE SET emoji = excluded.emoji, timestamp = excluded.timestamp",
            params![
                id.to_string(),
                message_id.to_string(),
                reactor.to_hex(),
                emoji,
                encode_timestamp(timestamp),
            ],
        )?;

        // The row keeps its original id on conflict.
        self.get_reaction(message_id, reactor)?
            .ok_or(crate::StoreError::NotFound)
    }

    pub fn get_reaction(&self, message_id: Uuid, reactor: &CryptoId) -> Result<Option<Reaction>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, message_id, reactor, emoji, timestamp
                 FROM reactions WHERE message_id = ?1 AND reactor = ?2",
                params![message_id.to_string(), reactor.to_hex()],
                row_to_reaction,
            )
            .optional()?)
    }

    pub fn remove_reaction(&self, message_id: Uuid, reactor: &CryptoId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND reactor = ?2",
            params![message_id.to_string(), reactor.to_hex()],
        )?;
        Ok(affected > 0)
    }

    pub fn get_reactions_for_message(&self, message_id: Uuid) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_id, reactor, emoji, timestamp
             FROM reactions WHERE message_id = ?1 ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], row_to_reaction)?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }

    pub fn delete_reactions_for_message(&self, message_id: Uuid) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1",
            params![message_id.to_string()],
        )?)
    }
}

fn row_to_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    let id_str: String = row.get(0)?;
    let message_str: String = row.get(1)?;
    let reactor_hex: String = row.get(2)?;
    let ts_str: String = row.get(4)?;

    Ok(Reaction {
        id: parse_uuid(0, &id_str)?,
        message_id: parse_uuid(1, &message_str)?,
        reactor: parse_crypto_id(2, &reactor_hex)?,
        emoji: row.get(3)?,
        timestamp: parse_timestamp(4, &ts_str)?,
    })
}
