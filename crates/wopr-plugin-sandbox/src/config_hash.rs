//! Canonical config fingerprint for drift detection.
//!
//! The canonical form is defined here and nowhere else: absent optional
//! fields are never serialized, object keys are ordered (serde_json's default
//! map is ordered by key), primitive arrays are sorted, and arrays of objects
//! keep their order with each element normalized. The fingerprint is the
//! SHA-256 of the compact serialization of that form.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::path::Path;
use wopr_sandbox_types::{SandboxDockerConfig, SandboxError, SandboxResult, WorkspaceAccess};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashInput<'a> {
    docker: &'a SandboxDockerConfig,
    workspace_access: WorkspaceAccess,
    workspace_dir: &'a str,
}

/// Fingerprint of everything that, when changed, requires a container
/// recreate. 64 lowercase hex chars.
pub fn compute_sandbox_config_hash(
    docker: &SandboxDockerConfig,
    workspace_access: WorkspaceAccess,
    workspace_dir: &Path,
) -> SandboxResult<String> {
    let input = HashInput {
        docker,
        workspace_access,
        workspace_dir: &workspace_dir.to_string_lossy(),
    };
    let value =
        serde_json::to_value(&input).map_err(|e| SandboxError::Serialization(e.to_string()))?;
    Ok(hash_canonical_value(value))
}

/// Canonicalize and hash an arbitrary JSON value.
pub(crate) fn hash_canonical_value(mut value: Value) -> String {
    canonicalize(&mut value);
    let canonical = value.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &mut Value) {
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                canonicalize(item);
            }
            if items.iter().all(|i| !i.is_array() && !i.is_object()) {
                items.sort_by(compare_primitives);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                canonicalize(v);
            }
        }
        _ => {}
    }
}

fn compare_primitives(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a)
            .cmp(&type_rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
