//! SQL schema for the QMS SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Catalog of on-disk backup artifacts. Rows are immutable after insert;
-- the only lifecycle event is deletion.
CREATE TABLE IF NOT EXISTS artifacts (
    artifact_id  TEXT PRIMARY KEY,
    captured_at  TEXT NOT NULL,     -- ISO 8601 UTC; server-assigned
    size_bytes   INTEGER NOT NULL,
    kind         TEXT NOT NULL,     -- 'scheduled' | 'manual'
    storage_path TEXT NOT NULL,     -- join key to the filesystem
    initiated_by TEXT,              -- NULL for scheduler-initiated captures
    note         TEXT NOT NULL DEFAULT ''
);

-- Append-only audit ledger. Written by every mutating backup operation,
-- pruned by the yearly archival run (1-year cutoff).
CREATE TABLE IF NOT EXISTS audit_log (
    entry_id   TEXT PRIMARY KEY,
    actor      TEXT,               -- NULL for system-initiated operations
    action     TEXT NOT NULL,
    target     TEXT,
    detail     TEXT NOT NULL,
    origin     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Business record collections, reduced to the columns the archival engine
-- needs. Full CRUD lives elsewhere in the platform.
CREATE TABLE IF NOT EXISTS performance_records (
    record_id  TEXT PRIMARY KEY,
    summary    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nonconformances (
    nc_id       TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    occurred_on TEXT NOT NULL      -- ISO 8601 date
);

CREATE TABLE IF NOT EXISTS customer_complaints (
    complaint_id TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    occurred_on  TEXT NOT NULL     -- ISO 8601 date
);

CREATE INDEX IF NOT EXISTS artifacts_captured_idx    ON artifacts(captured_at);
CREATE INDEX IF NOT EXISTS artifacts_path_idx        ON artifacts(storage_path);
CREATE INDEX IF NOT EXISTS audit_log_created_idx     ON audit_log(created_at);
CREATE INDEX IF NOT EXISTS performance_created_idx   ON performance_records(created_at);
CREATE INDEX IF NOT EXISTS nonconformances_date_idx  ON nonconformances(occurred_on);
CREATE INDEX IF NOT EXISTS complaints_date_idx       ON customer_complaints(occurred_on);

PRAGMA user_version = 1;
";
