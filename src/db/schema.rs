//! SQLite schema initialization for the resource cache.
//!
//! One table, keyed by `(id, resource_type)`, holding the raw JSON document
//! of every fetched resource. The `key` column carries the reference form
//! (`Type/id`) so reference lookups can hit an index.

use rusqlite::Connection;

// ---------------------------------------------------------------------------
// DDL
// ---------------------------------------------------------------------------

const CREATE_RESOURCES: &str = "\
CREATE TABLE IF NOT EXISTS resources (
  id VARCHAR NOT NULL,
  resource_type VARCHAR NOT NULL,
  key VARCHAR NOT NULL,
  resource JSON NOT NULL,
  PRIMARY KEY (id, resource_type)
)";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_resources_key ON resources(key)",
    "CREATE INDEX IF NOT EXISTS idx_resources_type ON resources(resource_type)",
];

/// Database path that keeps everything in memory.
pub const IN_MEMORY: &str = ":memory:";

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Open (or create) the SQLite database at `db_path` and apply the schema.
///
/// File-backed databases run in WAL mode with synchronous NORMAL; an
/// existing database is reused as-is, so re-running a traversal against
/// the same path only adds resources it has not seen.
///
/// # Errors
///
/// Returns a `rusqlite::Error` if the database cannot be opened or any DDL
/// statement fails.
pub fn initialize_database(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;

    if db_path != IN_MEMORY {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(CREATE_RESOURCES)?;
    for ddl in CREATE_INDEXES {
        conn.execute_batch(ddl)?;
    }

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_resources_table() {
        let conn = initialize_database(IN_MEMORY).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'resources'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");
        let path = path.to_str().unwrap();
        drop(initialize_database(path).unwrap());
        let conn = initialize_database(path).unwrap();
        let n: i64 = conn
            .query_row("SELECT count(*) FROM resources", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn primary_key_rejects_duplicate_rows() {
        let conn = initialize_database(IN_MEMORY).unwrap();
        let insert = "INSERT INTO resources (id, resource_type, key, resource) VALUES ('1', 'Patient', 'Patient/1', '{}')";
        conn.execute_batch(insert).unwrap();
        assert!(conn.execute_batch(insert).is_err());
    }
}
