//! v001 -- Initial schema creation.
//!
//! Creates the discussion tables: `discussions`, `messages`, `reactions`,
//! `deferred_requests` and `participant_sequence_numbers`. Every dependent
//! row cascades with its discussion.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Discussions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS discussions (
    id                         TEXT PRIMARY KEY NOT NULL,  -- UUID v4, permanent
    owned_identity             TEXT NOT NULL,              -- hex-encoded 32 bytes
    kind                       INTEGER NOT NULL,           -- 0 one-to-one, 1 group v1, 2 group v2
    counterpart                TEXT,                       -- contact or group, NULL once gone
    status                     INTEGER NOT NULL,           -- 0 pre-discussion, 1 active, 2 locked
    title                      TEXT NOT NULL,
    shared_config_version      INTEGER,                    -- NULL until ever exchanged
    shared_expiration          TEXT NOT NULL,              -- JSON
    local_configuration        TEXT NOT NULL,              -- JSON
    sender_thread_id           TEXT NOT NULL,              -- UUID v4
    last_outbound_seq          INTEGER NOT NULL DEFAULT 0,
    last_system_seq            INTEGER NOT NULL DEFAULT 0,
    number_of_new_messages     INTEGER NOT NULL DEFAULT 0,
    new_message_mentions_owned INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    illustrative_message_id    TEXT,                       -- lookup only, no FK
    pinned_index               INTEGER,
    is_archived                INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    timestamp_of_last_message  TEXT NOT NULL,              -- RFC-3339
    last_remote_deletion_at    TEXT,                       -- RFC-3339
    created_at                 TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_discussions_owned_identity
    ON discussions(owned_identity);

-- ----------------------------------------------------------------
-- Messages (received, sent and system)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                     TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    discussion_id          TEXT NOT NULL,              -- FK -> discussions(id)
    kind                   INTEGER NOT NULL,           -- 0 received, 1 sent, 2 system
    sender_identity        TEXT,                       -- NULL for system messages
    sender_sequence_number INTEGER NOT NULL,
    sender_thread_id       TEXT,                       -- NULL for system messages
    server_message_id      TEXT,
    sort_index             REAL NOT NULL,
    timestamp              TEXT NOT NULL,
    body                   TEXT,
    mentions               TEXT NOT NULL DEFAULT '[]', -- JSON
    mentions_owned         INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    is_new                 INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    is_wiped               INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    wiped_by               TEXT,
    edited_at              TEXT,
    system_category        INTEGER,
    system_actor           TEXT,

    FOREIGN KEY (discussion_id) REFERENCES discussions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_discussion_sort
    ON messages(discussion_id, sort_index);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_reference
    ON messages(discussion_id, kind, sender_identity, sender_thread_id, sender_sequence_number)
    WHERE kind != 2;

CREATE INDEX IF NOT EXISTS idx_messages_server_id
    ON messages(discussion_id, server_message_id);

-- ----------------------------------------------------------------
-- Reactions (at most one per reactor and message)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    message_id TEXT NOT NULL,                -- FK -> messages(id)
    reactor    TEXT NOT NULL,                -- hex-encoded identity
    emoji      TEXT NOT NULL,
    timestamp  TEXT NOT NULL,

    UNIQUE (message_id, reactor),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Deferred remote requests (target not yet received)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS deferred_requests (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT, -- FIFO order
    discussion_id          TEXT NOT NULL,
    requester              TEXT NOT NULL,
    kind                   INTEGER NOT NULL,        -- 0 wipe, 1 edit, 2 reaction
    target_sender          TEXT NOT NULL,
    target_sequence_number INTEGER NOT NULL,
    target_thread_id       TEXT NOT NULL,
    payload                TEXT,                    -- JSON
    server_timestamp       TEXT NOT NULL,
    created_at             TEXT NOT NULL,

    FOREIGN KEY (discussion_id) REFERENCES discussions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_deferred_target
    ON deferred_requests(discussion_id, target_sender, target_thread_id, target_sequence_number);

-- ----------------------------------------------------------------
-- Latest sequence number seen per participant and thread
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participant_sequence_numbers (
    discussion_id          TEXT NOT NULL,
    participant            TEXT NOT NULL,
    sender_thread_id       TEXT NOT NULL,
    latest_sequence_number INTEGER NOT NULL,

    PRIMARY KEY (discussion_id, participant, sender_thread_id),
    FOREIGN KEY (discussion_id) REFERENCES discussions(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
