//! CRUD over persistent per-container records.
//!
//! Records are keyed by container name. `createdAtMs` and `image` are fixed
//! at first insert; later touches only refresh `sessionKey`, `lastUsedAtMs`,
//! and (when provided) `configHash`. A lost insert race is retried once as an
//! update.

use crate::storage::RecordTable;
use tracing::warn;
use wopr_sandbox_types::{SandboxError, SandboxRegistryRecord, SandboxResult};

/// Fields the caller provides when touching a container record.
#[derive(Debug, Clone)]
pub struct RegistryUpdate {
    pub container_name: String,
    pub session_key: String,
    pub created_at_ms: i64,
    pub last_used_at_ms: i64,
    pub image: String,
    pub config_hash: Option<String>,
}

enum UpsertOutcome {
    Done(SandboxRegistryRecord),
    InsertConflict,
}

/// Upsert a container record.
pub fn update_registry(
    table: &dyn RecordTable,
    update: &RegistryUpdate,
) -> SandboxResult<SandboxRegistryRecord> {
    match upsert_once(table, update)? {
        UpsertOutcome::Done(rec) => Ok(rec),
        UpsertOutcome::InsertConflict => {
            // Lost an insert race; the record exists now, retry as an update.
            match upsert_once(table, update)? {
                UpsertOutcome::Done(rec) => Ok(rec),
                UpsertOutcome::InsertConflict => {
                    Err(SandboxError::Conflict(update.container_name.clone()))
                }
            }
        }
    }
}

fn upsert_once(table: &dyn RecordTable, update: &RegistryUpdate) -> SandboxResult<UpsertOutcome> {
    if let Some(existing) = find_registry_entry(table, &update.container_name)? {
        let merged = SandboxRegistryRecord {
            id: existing.id,
            container_name: update.container_name.clone(),
            session_key: update.session_key.clone(),
            created_at_ms: existing.created_at_ms,
            last_used_at_ms: update.last_used_at_ms,
            image: existing.image,
            config_hash: update.config_hash.clone().or(existing.config_hash),
        };
        table.put(&merged.id, &to_value(&merged)?)?;
        return Ok(UpsertOutcome::Done(merged));
    }

    let record = SandboxRegistryRecord {
        id: update.container_name.clone(),
        container_name: update.container_name.clone(),
        session_key: update.session_key.clone(),
        created_at_ms: update.created_at_ms,
        last_used_at_ms: update.last_used_at_ms,
        image: update.image.clone(),
        config_hash: update.config_hash.clone(),
    };
    match table.insert(&record.id, &to_value(&record)?) {
        Ok(()) => Ok(UpsertOutcome::Done(record)),
        Err(SandboxError::Conflict(_)) => Ok(UpsertOutcome::InsertConflict),
        Err(e) => Err(e),
    }
}

pub fn find_registry_entry(
    table: &dyn RecordTable,
    container_name: &str,
) -> SandboxResult<Option<SandboxRegistryRecord>> {
    match table.get(container_name)? {
        Some(value) => {
            let record = serde_json::from_value(value)
                .map_err(|e| SandboxError::Serialization(e.to_string()))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// Returns true when a record was removed.
pub fn remove_registry_entry(table: &dyn RecordTable, container_name: &str) -> SandboxResult<bool> {
    table.delete(container_name)
}

/// All known records; rows that no longer deserialize are skipped.
pub fn list_registry_entries(table: &dyn RecordTable) -> SandboxResult<Vec<SandboxRegistryRecord>> {
    let mut records = Vec::new();
    for value in table.list()? {
        match serde_json::from_value::<SandboxRegistryRecord>(value) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "Skipping unreadable sandbox registry row"),
        }
    }
    Ok(records)
}

fn to_value(record: &SandboxRegistryRecord) -> SandboxResult<serde_json::Value> {
    serde_json::to_value(record).map_err(|e| SandboxError::Serialization(e.to_string()))
}
