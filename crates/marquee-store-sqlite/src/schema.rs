//! SQL schema for the Marquee SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS identities (
    identity_id TEXT PRIMARY KEY,
    kind        TEXT NOT NULL CHECK (kind IN ('person', 'group')),
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- Alias names are unique catalog-wide by their normalised key, so a name
-- resolves to exactly one identity.
CREATE TABLE IF NOT EXISTS aliases (
    alias_id    TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL REFERENCES identities(identity_id),
    name        TEXT NOT NULL,
    name_key    TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memberships (
    membership_id TEXT PRIMARY KEY,
    member_id     TEXT NOT NULL REFERENCES identities(identity_id),
    group_id      TEXT NOT NULL REFERENCES identities(identity_id),
    created_at    TEXT NOT NULL,
    UNIQUE (member_id, group_id),
    CHECK  (member_id != group_id)
);

-- source_id points at a media item outside this schema.
CREATE TABLE IF NOT EXISTS credits (
    credit_id   TEXT PRIMARY KEY,
    source_id   TEXT NOT NULL,
    identity_id TEXT NOT NULL REFERENCES identities(identity_id),
    role_id     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (source_id, identity_id, role_id)
);

-- One row per user action or undo; created by the first write of the batch.
CREATE TABLE IF NOT EXISTS batches (
    batch_id   TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,       -- 'action' | 'undo'
    label      TEXT,
    created_at TEXT NOT NULL,
    undone_at  TEXT,
    undone_by  TEXT,
    purged_at  TEXT
);

-- Single-row counter ordering repository calls across change_log and
-- deleted_records.
CREATE TABLE IF NOT EXISTS audit_sequence (
    id    INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO audit_sequence (id, value) VALUES (1, 0);

-- Append-only. Values are JSON-encoded column values.
CREATE TABLE IF NOT EXISTS change_log (
    entry_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    seq         INTEGER NOT NULL,
    batch_id    TEXT NOT NULL REFERENCES batches(batch_id),
    table_name  TEXT NOT NULL,
    record_id   TEXT NOT NULL,
    field       TEXT NOT NULL,
    change_kind TEXT NOT NULL,       -- 'insert' | 'update'
    old_value   TEXT NOT NULL,
    new_value   TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

-- Recycle bin. Append-only apart from restored_at and explicit purges.
CREATE TABLE IF NOT EXISTS deleted_records (
    deleted_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    seq         INTEGER NOT NULL,
    batch_id    TEXT NOT NULL REFERENCES batches(batch_id),
    table_name  TEXT NOT NULL,
    record_id   TEXT NOT NULL,
    row_json    TEXT NOT NULL,
    deleted_at  TEXT NOT NULL,
    restored_at TEXT,
    -- Set on the snapshot of an identity absorbed by a merge.
    redirect_to TEXT
);

CREATE INDEX IF NOT EXISTS aliases_identity_idx    ON aliases(identity_id);
CREATE INDEX IF NOT EXISTS memberships_group_idx   ON memberships(group_id);
CREATE INDEX IF NOT EXISTS credits_identity_idx    ON credits(identity_id);
CREATE INDEX IF NOT EXISTS change_log_batch_idx    ON change_log(batch_id);
CREATE INDEX IF NOT EXISTS change_log_record_idx   ON change_log(table_name, record_id);
CREATE INDEX IF NOT EXISTS deleted_batch_idx       ON deleted_records(batch_id);
CREATE INDEX IF NOT EXISTS deleted_record_idx      ON deleted_records(table_name, record_id);

PRAGMA user_version = 1;
";

/// Applied to the read-only connection of a file-backed store.
pub const READER_PRAGMAS: &str = "
PRAGMA foreign_keys = ON;
PRAGMA query_only = ON;
";
