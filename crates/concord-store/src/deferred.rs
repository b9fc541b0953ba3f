use chrono::{DateTime, Utc};
use concord_shared::MessageReference;
use rusqlite::params;
use uuid::Uuid;

use crate::database::{encode_timestamp, parse_crypto_id, parse_timestamp, parse_uuid, Database};
use crate::error::Result;
use crate::models::{DeferredRequest, DeferredRequestKind};

const DEFERRED_COLUMNS: &str = "id, discussion_id, requester, kind, target_sender,
     target_sequence_number, target_thread_id, payload, server_timestamp, created_at";

impl Database {
    /// Persist a deferred request and return its arrival-ordered id.
    pub fn insert_deferred_request(&self, request: &DeferredRequest) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO deferred_requests (discussion_id, requester, kind, target_sender,
                 target_sequence_number, target_thread_id, payload, server_timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                request.discussion_id.to_string(),
                request.requester.to_hex(),
                request.kind.as_i64(),
                request.target.sender_identity.to_hex(),
                request.target.sender_sequence_number as i64,
                request.target.sender_thread_id.to_string(),
                request.payload,
                encode_timestamp(&request.server_timestamp),
                encode_timestamp(&request.created_at),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Pending requests targeting `target`, oldest arrival first.
    pub fn list_deferred_requests_for(
        &self,
        discussion_id: Uuid,
        target: &MessageReference,
    ) -> Result<Vec<DeferredRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {DEFERRED_COLUMNS} FROM deferred_requests
             WHERE discussion_id = ?1 AND target_sender = ?2
               AND target_sequence_number = ?3 AND target_thread_id = ?4
             ORDER BY id ASC"
        ))?;

        let rows = stmt.query_map(
            params![
                discussion_id.to_string(),
                target.sender_identity.to_hex(),
                target.sender_sequence_number as i64,
                target.sender_thread_id.to_string(),
            ],
            row_to_deferred,
        )?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    pub fn delete_deferred_requests_for(
        &self,
        discussion_id: Uuid,
        target: &MessageReference,
    ) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM deferred_requests
             WHERE discussion_id = ?1 AND target_sender = ?2
               AND target_sequence_number = ?3 AND target_thread_id = ?4",
            params![
                discussion_id.to_string(),
                target.sender_identity.to_hex(),
                target.sender_sequence_number as i64,
                target.sender_thread_id.to_string(),
            ],
        )?)
    }

    pub fn delete_all_deferred_requests(&self, discussion_id: Uuid) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM deferred_requests WHERE discussion_id = ?1",
            params![discussion_id.to_string()],
        )?)
    }

    pub fn count_deferred_requests(&self, discussion_id: Uuid) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM deferred_requests WHERE discussion_id = ?1",
            params![discussion_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Drop every deferred request that arrived before `cutoff`.
    pub fn purge_deferred_requests_older_than(&self, cutoff: &DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM deferred_requests WHERE created_at < ?1",
            params![encode_timestamp(cutoff)],
        )?)
    }
}

fn row_to_deferred(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeferredRequest> {
    let discussion_str: String = row.get(1)?;
    let requester_hex: String = row.get(2)?;
    let kind_raw: i64 = row.get(3)?;
    let target_hex: String = row.get(4)?;
    let thread_str: String = row.get(6)?;
    let server_ts: String = row.get(8)?;
    let created_ts: String = row.get(9)?;

    let kind = DeferredRequestKind::from_i64(kind_raw)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(3, kind_raw))?;

    Ok(DeferredRequest {
        id: row.get(0)?,
        discussion_id: parse_uuid(1, &discussion_str)?,
        requester: parse_crypto_id(2, &requester_hex)?,
        kind,
        target: MessageReference {
            sender_identity: parse_crypto_id(4, &target_hex)?,
            sender_sequence_number: row.get::<_, i64>(5)? as u64,
            sender_thread_id: parse_uuid(6, &thread_str)?,
        },
        payload: row.get(7)?,
        server_timestamp: parse_timestamp(8, &server_ts)?,
        created_at: parse_timestamp(9, &created_ts)?,
    })
}
