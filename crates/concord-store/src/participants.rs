//! Latest sender sequence number seen per participant and sender thread.

use concord_shared::CryptoId;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Record `sequence_number` unless a larger one was already seen.
    pub fn upsert_participant_sequence_number(
        &self,
        discussion_id: Uuid,
        participant: &CryptoId,
        sender_thread_id: Uuid,
        sequence_number: u64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO participant_sequence_numbers
                 (discussion_id, participant, sender_thread_id, latest_sequence_number)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (discussion_id, participant, sender_thread_id)
             DO UPDATE SET latest_sequence_number =
                 MAX(latest_sequence_number, excluded.latest_sequence_number)",
            params![
                discussion_id.to_string(),
                participant.to_hex(),
                sender_thread_id.to_string(),
                sequence_number as i64,
            ],
        )?;
        Ok(())
    }

    pub fn latest_participant_sequence_number(
        &self,
        discussion_id: Uuid,
        participant: &CryptoId,
        sender_thread_id: Uuid,
    ) -> Result<Option<u64>> {
        let latest: Option<i64> = self
            .conn()
            .query_row(
                "SELECT latest_sequence_number FROM participant_sequence_numbers
                 WHERE discussion_id = ?1 AND participant = ?2 AND sender_thread_id = ?3",
                params![
                    discussion_id.to_string(),
                    participant.to_hex(),
                    sender_thread_id.to_string(),
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(latest.map(|v| v as u64))
    }

    pub fn purge_participant_sequence_numbers(&self, discussion_id: Uuid) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM participant_sequence_numbers WHERE discussion_id = ?1",
            params![discussion_id.to_string()],
        )?)
    }
}
