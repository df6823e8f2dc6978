//! Persistent repository seam and the bundled SQLite implementation.
//!
//! The host injects a [`PluginStorage`] at plugin init. Tables are declared
//! with a [`TableSpec`] and accessed through the narrow [`RecordTable`]
//! trait; records are JSON blobs keyed by their primary id. The bundled
//! implementation stores each table as `(id TEXT PRIMARY KEY, record TEXT)`
//! with expression indexes over the declared record fields.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use wopr_sandbox_types::{SandboxError, SandboxResult};

/// Declares a repository table: namespace, name, schema version, primary key,
/// and secondary indexes over record fields.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub namespace: &'static str,
    pub name: &'static str,
    pub version: u32,
    pub primary_key: &'static str,
    pub indexes: &'static [&'static str],
}

/// The sandbox container registry table.
pub const SANDBOX_REGISTRY_TABLE: TableSpec = TableSpec {
    namespace: "sandbox",
    name: "sandbox_registry",
    version: 1,
    primary_key: "id",
    indexes: &["sessionKey", "containerName", "lastUsedAtMs"],
};

/// Host-provided persistent storage. The host serializes its own writes.
pub trait PluginStorage: Send + Sync {
    /// Open (creating if needed) the table described by `spec`.
    fn table(&self, spec: &TableSpec) -> SandboxResult<Arc<dyn RecordTable>>;
}

/// CRUD over one table of JSON records keyed by id.
pub trait RecordTable: Send + Sync {
    fn get(&self, id: &str) -> SandboxResult<Option<serde_json::Value>>;
    /// Insert a new record. Fails with [`SandboxError::Conflict`] when the id
    /// already exists.
    fn insert(&self, id: &str, record: &serde_json::Value) -> SandboxResult<()>;
    /// Insert or replace.
    fn put(&self, id: &str, record: &serde_json::Value) -> SandboxResult<()>;
    /// Returns true when a record was deleted.
    fn delete(&self, id: &str) -> SandboxResult<bool>;
    fn list(&self) -> SandboxResult<Vec<serde_json::Value>>;
}

fn storage_err(e: rusqlite::Error) -> SandboxError {
    SandboxError::Storage(e.to_string())
}

/// Bundled SQLite storage, used when the host does not bring its own.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> SandboxResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> SandboxResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> SandboxResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS table_versions (
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                PRIMARY KEY (namespace, name)
            )",
        )
        .map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> SandboxResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SandboxError::Internal(e.to_string()))
    }
}

impl PluginStorage for SqliteStorage {
    fn table(&self, spec: &TableSpec) -> SandboxResult<Arc<dyn RecordTable>> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (id TEXT PRIMARY KEY, record TEXT NOT NULL)",
            t = spec.name
        ))
        .map_err(storage_err)?;
        for field in spec.indexes {
            conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_{f} ON {t} (json_extract(record, '$.{f}'))",
                t = spec.name,
                f = field
            ))
            .map_err(storage_err)?;
        }
        conn.execute(
            "INSERT INTO table_versions (namespace, name, version) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, name) DO UPDATE SET version = ?3",
            rusqlite::params![spec.namespace, spec.name, spec.version],
        )
        .map_err(storage_err)?;
        drop(conn);
        Ok(Arc::new(SqliteTable {
            conn: Arc::clone(&self.conn),
            table: spec.name,
        }))
    }
}

struct SqliteTable {
    conn: Arc<Mutex<Connection>>,
    table: &'static str,
}

impl SqliteTable {
    fn lock(&self) -> SandboxResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SandboxError::Internal(e.to_string()))
    }
}

impl RecordTable for SqliteTable {
    fn get(&self, id: &str) -> SandboxResult<Option<serde_json::Value>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT record FROM {} WHERE id = ?1", self.table))
            .map_err(storage_err)?;
        let result = stmt.query_row(rusqlite::params![id], |row| row.get::<_, String>(0));
        match result {
            Ok(blob) => {
                let value = serde_json::from_str(&blob)
                    .map_err(|e| SandboxError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    fn insert(&self, id: &str, record: &serde_json::Value) -> SandboxResult<()> {
        let blob = serde_json::to_string(record)
            .map_err(|e| SandboxError::Serialization(e.to_string()))?;
        let conn = self.lock()?;
        match conn.execute(
            &format!("INSERT INTO {} (id, record) VALUES (?1, ?2)", self.table),
            rusqlite::params![id, blob],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(SandboxError::Conflict(id.to_string()))
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    fn put(&self, id: &str, record: &serde_json::Value) -> SandboxResult<()> {
        let blob = serde_json::to_string(record)
            .map_err(|e| SandboxError::Serialization(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, record) VALUES (?1, ?2)
                 ON CONFLICT (id) DO UPDATE SET record = ?2",
                self.table
            ),
            rusqlite::params![id, blob],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> SandboxResult<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", self.table),
                rusqlite::params![id],
            )
            .map_err(storage_err)?;
        Ok(rows > 0)
    }

    fn list(&self) -> SandboxResult<Vec<serde_json::Value>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT record FROM {} ORDER BY id", self.table))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        let mut records = Vec::new();
        for row in rows {
            let blob = row.map_err(storage_err)?;
            let value = serde_json::from_str(&blob)
                .map_err(|e| SandboxError::Serialization(e.to_string()))?;
            records.push(value);
        }
        Ok(records)
    }
}
