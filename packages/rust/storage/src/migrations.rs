//! SQL migration definitions for the tracking database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: tracking_records",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per tagged source resource
CREATE TABLE IF NOT EXISTS tracking_records (
    id                TEXT PRIMARY KEY,
    source_ref        TEXT NOT NULL UNIQUE,
    namespace         TEXT NOT NULL,
    domain            TEXT NOT NULL,
    file_type         INTEGER NOT NULL,
    is_valid          INTEGER,
    last_processed_at TEXT,
    last_success_at   TEXT,
    last_error        TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tracking_domain_ns ON tracking_records(domain, namespace);
CREATE INDEX IF NOT EXISTS idx_tracking_file_type ON tracking_records(file_type);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
