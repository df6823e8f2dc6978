//! One-shot import of the legacy JSON registry.
//!
//! Earlier releases kept container records in a flat JSON file. On init the
//! file, if present, is imported into the repository and moved aside so the
//! import never runs twice. A file that cannot be parsed or renamed aborts
//! plugin init; individually invalid entries are merely skipped.

use crate::storage::RecordTable;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use wopr_sandbox_types::{SandboxError, SandboxRegistryRecord, SandboxResult};

#[derive(Debug, Deserialize)]
struct LegacyRegistryFile {
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

/// Import the legacy registry file at `path`, if it exists, then rename it
/// to `<path>.backup`. Returns the number of records imported.
pub fn migrate_legacy_registry(path: &Path, table: &dyn RecordTable) -> SandboxResult<usize> {
    if !path.exists() {
        return Ok(0);
    }
    info!(path = %path.display(), "Migrating legacy sandbox registry");

    let contents = std::fs::read_to_string(path)?;
    let file: LegacyRegistryFile = serde_json::from_str(&contents).map_err(|e| {
        SandboxError::Migration(format!("failed to parse {}: {e}", path.display()))
    })?;

    let mut imported = 0;
    for entry in file.entries {
        match serde_json::from_value::<SandboxRegistryRecord>(entry) {
            Ok(record) => {
                let value = serde_json::to_value(&record)
                    .map_err(|e| SandboxError::Serialization(e.to_string()))?;
                table.put(&record.id, &value)?;
                imported += 1;
            }
            Err(e) => warn!(error = %e, "Skipping invalid legacy registry entry"),
        }
    }

    let backup = PathBuf::from(format!("{}.backup", path.display()));
    std::fs::rename(path, &backup).map_err(|e| {
        SandboxError::Migration(format!(
            "failed to rename {} to {}: {e}",
            path.display(),
            backup.display()
        ))
    })?;

    info!(imported, "Legacy sandbox registry migrated");
    Ok(imported)
}
