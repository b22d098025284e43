//! Turso Embedded / libSQL storage for the peer-benchmark corpus.
//!
//! The [`Storage`] struct wraps a libSQL database holding previously
//! assessed systems and an FTS5 index over their rendered text. Ranking is
//! FTS5 `bm25`, exposed as the raw `rank` (lower is closer).

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use vaultzero_shared::{Result, VaultZeroError};

/// Maximum number of query terms passed to FTS5.
const MAX_QUERY_TERMS: usize = 64;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    /// Held so the database outlives `conn`.
    _db: Database,
    conn: Connection,
}

/// A peer assessment ready for indexing.
#[derive(Debug, Clone)]
pub struct PeerDocument {
    pub system_id: String,
    pub system_type: String,
    pub maturity: String,
    /// Indexable text rendered from the record.
    pub content: String,
    /// The source record, kept verbatim.
    pub record_json: String,
}

/// A search hit from FTS5.
#[derive(Debug, Clone)]
pub struct PeerHit {
    pub system_id: String,
    pub system_type: String,
    pub maturity: String,
    pub content: String,
    /// FTS5 rank score (lower is better).
    pub rank: f64,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VaultZeroError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?;

        let storage = Self { _db: db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        VaultZeroError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Peer operations
    // -----------------------------------------------------------------------

    /// Insert or replace a peer by `system_id`.
    pub async fn upsert_peer(&self, doc: &PeerDocument) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO peers (system_id, system_type, maturity, content, record_json, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(system_id) DO UPDATE SET
                     system_type = excluded.system_type,
                     maturity = excluded.maturity,
                     content = excluded.content,
                     record_json = excluded.record_json,
                     indexed_at = excluded.indexed_at",
                params![
                    doc.system_id.as_str(),
                    doc.system_type.as_str(),
                    doc.maturity.as_str(),
                    doc.content.as_str(),
                    doc.record_json.as_str(),
                    now
                ],
            )
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Number of indexed peers.
    pub async fn peer_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM peers", params![])
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(VaultZeroError::Storage(e.to_string())),
        }
    }

    /// Fetch the stored source record of one peer.
    pub async fn get_peer_record(&self, system_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT record_json FROM peers WHERE system_id = ?1",
                params![system_id],
            )
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| VaultZeroError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(VaultZeroError::Storage(e.to_string())),
        }
    }

    /// Every stored source record, ordered by system id.
    pub async fn list_peer_records(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT record_json FROM peers ORDER BY system_id",
                params![],
            )
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?
        {
            records.push(
                row.get::<String>(0)
                    .map_err(|e| VaultZeroError::Storage(e.to_string()))?,
            );
        }
        Ok(records)
    }

    /// Remove every peer (the FTS index follows via triggers).
    pub async fn clear_peers(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM peers", params![])
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Rank peers against free text, closest first.
    pub async fn search_peers(&self, text: &str, limit: u32) -> Result<Vec<PeerHit>> {
        let Some(query) = fts_query(text) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT p.system_id, p.system_type, p.maturity, p.content, rank
                 FROM peers_fts fts
                 JOIN peers p ON p.rowid = fts.rowid
                 WHERE peers_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                params![query, limit],
            )
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| VaultZeroError::Storage(e.to_string()))?
        {
            results.push(PeerHit {
                system_id: row
                    .get(0)
                    .map_err(|e| VaultZeroError::Storage(e.to_string()))?,
                system_type: row
                    .get(1)
                    .map_err(|e| VaultZeroError::Storage(e.to_string()))?,
                maturity: row
                    .get(2)
                    .map_err(|e| VaultZeroError::Storage(e.to_string()))?,
                content: row
                    .get(3)
                    .map_err(|e| VaultZeroError::Storage(e.to_string()))?,
                rank: row
                    .get(4)
                    .map_err(|e| VaultZeroError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }
}

/// Turn free text into an FTS5 `OR` query of quoted terms.
///
/// Returns `None` when no usable term remains.
fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() < 2 {
            continue;
        }
        let term = word.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }

    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}
