//! SQLite-backed resource cache.
//!
//! Every query goes through [`Connection::prepare_cached`]. The connection
//! sits behind a mutex so the store can be shared by reference between
//! concurrently polled queries; the lock is only held for the duration of a
//! single statement and never across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::db::schema::{initialize_database, IN_MEMORY};
use crate::error::{FhirGraphError, Result};
use crate::types::{InsertOutcome, Resource, ResourceKey};

// ---------------------------------------------------------------------------
// SQL constants
// ---------------------------------------------------------------------------

const INSERT_RESOURCE_SQL: &str = "\
INSERT INTO resources (id, resource_type, key, resource)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(id, resource_type) DO NOTHING";

const LIST_BY_TYPE_SQL: &str = "\
SELECT resource FROM resources WHERE resource_type = ?1 ORDER BY rowid";

const GET_RESOURCE_SQL: &str = "\
SELECT resource FROM resources WHERE id = ?1 AND resource_type = ?2";

const COUNTS_BY_TYPE_SQL: &str = "\
SELECT resource_type, count(*) FROM resources GROUP BY resource_type";

// ---------------------------------------------------------------------------
// ResourceStore
// ---------------------------------------------------------------------------

/// Persistent `(id, resourceType) -> document` table with first-write-wins
/// inserts.
pub struct ResourceStore {
    conn: Mutex<Connection>,
    path: String,
    /// Successful inserts per type during this store's lifetime. Diagnostics only.
    adds: Mutex<BTreeMap<String, usize>>,
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn row_to_resource(text: &str) -> Result<Resource> {
    let document: Value = serde_json::from_str(text)?;
    Resource::from_document(document)
}

impl ResourceStore {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = initialize_database(db_path)?;
        Ok(Self::with_path(conn, db_path))
    }

    /// A throwaway store that lives only as long as this value.
    pub fn in_memory() -> Result<Self> {
        Self::new(IN_MEMORY)
    }

    /// Wrap an already-initialized connection.
    pub fn from_connection(conn: Connection) -> Self {
        let path = conn
            .path()
            .filter(|p| !p.is_empty())
            .unwrap_or(IN_MEMORY)
            .to_string();
        Self::with_path(conn, &path)
    }

    fn with_path(conn: Connection, path: &str) -> Self {
        Self {
            conn: Mutex::new(conn),
            path: path.to_string(),
            adds: Mutex::new(BTreeMap::new()),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Location of the backing database (`:memory:` for in-memory stores).
    pub fn path(&self) -> &str {
        &self.path
    }

    // -------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------

    /// Store `resource` unless its key is already present.
    ///
    /// A second insert under an existing key is a silent no-op: the first
    /// document written wins.
    pub fn insert(&self, resource: &Resource) -> Result<InsertOutcome> {
        let key = resource.key();
        let body = serde_json::to_string(resource.document())?;
        let changed = {
            let conn = self.conn();
            let mut stmt = conn.prepare_cached(INSERT_RESOURCE_SQL)?;
            stmt.execute(params![key.id, key.resource_type, key.reference(), body])?
        };

        if changed == 0 {
            return Ok(InsertOutcome::Duplicate);
        }
        let mut adds = self.adds.lock().unwrap_or_else(|e| e.into_inner());
        *adds.entry(key.resource_type.clone()).or_default() += 1;
        Ok(InsertOutcome::Inserted)
    }

    /// Validate a raw JSON document and insert it.
    ///
    /// Fails with [`FhirGraphError::Validation`] when `id` or
    /// `resourceType` is missing.
    pub fn insert_document(&self, document: Value) -> Result<InsertOutcome> {
        let resource = Resource::from_document(document)?;
        self.insert(&resource)
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    /// Every stored resource of `resource_type`, in storage order.
    pub fn list_by_type(&self, resource_type: &str) -> Result<Vec<Resource>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(LIST_BY_TYPE_SQL)?;
        let rows = stmt.query_and_then(params![resource_type], |row| {
            let text: String = row.get(0)?;
            row_to_resource(&text)
        })?;
        rows.collect()
    }

    /// Fetch one resource by key, or `None` if it was never stored.
    pub fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        let text: Option<String> = {
            let conn = self.conn();
            let mut stmt = conn.prepare_cached(GET_RESOURCE_SQL)?;
            stmt.query_row(params![key.id, key.resource_type], |row| row.get(0))
                .optional()?
        };
        text.as_deref().map(row_to_resource).transpose()
    }

    /// Number of stored resources per type.
    pub fn counts_by_type(&self) -> Result<BTreeMap<String, usize>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(COUNTS_BY_TYPE_SQL)?;
        let rows = stmt.query_map([], |row| {
            let resource_type: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((resource_type, count as usize))
        })?;
        rows.collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .map_err(Into::into)
    }

    /// Total number of stored resources.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT count(*) FROM resources")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Inserts that actually wrote a row, per type, since this store was opened.
    pub fn adds_by_type(&self) -> BTreeMap<String, usize> {
        self.adds.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Release the underlying connection.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().unwrap_or_else(|e| e.into_inner());
        conn.close().map_err(|(_, e)| FhirGraphError::Sqlite(e))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
