//! SQL migration definitions for the peer-benchmark database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

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
        description: "Initial schema: peers, FTS5 index",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Previously assessed systems
CREATE TABLE IF NOT EXISTS peers (
    system_id   TEXT PRIMARY KEY,
    system_type TEXT NOT NULL,
    maturity    TEXT NOT NULL,
    content     TEXT NOT NULL,
    record_json TEXT NOT NULL,
    indexed_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_peers_type ON peers(system_type);

-- Full-text search over the rendered assessment text
CREATE VIRTUAL TABLE IF NOT EXISTS peers_fts USING fts5(
    system_type,
    content,
    content=peers,
    content_rowid=rowid
);

-- Triggers to keep FTS in sync with peers table
CREATE TRIGGER IF NOT EXISTS peers_fts_insert AFTER INSERT ON peers BEGIN
    INSERT INTO peers_fts(rowid, system_type, content)
    VALUES (new.rowid, new.system_type, new.content);
END;

CREATE TRIGGER IF NOT EXISTS peers_fts_delete AFTER DELETE ON peers BEGIN
    INSERT INTO peers_fts(peers_fts, rowid, system_type, content)
    VALUES ('delete', old.rowid, old.system_type, old.content);
END;

CREATE TRIGGER IF NOT EXISTS peers_fts_update AFTER UPDATE ON peers BEGIN
    INSERT INTO peers_fts(peers_fts, rowid, system_type, content)
    VALUES ('delete', old.rowid, old.system_type, old.content);
    INSERT INTO peers_fts(rowid, system_type, content)
    VALUES (new.rowid, new.system_type, new.content);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
