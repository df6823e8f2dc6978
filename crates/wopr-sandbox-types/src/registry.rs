//! Persistent per-container registry record.

use serde::{Deserialize, Serialize};

/// One row of the `sandbox_registry` table, keyed by container name.
///
/// `created_at_ms` and `image` are immutable after the first insert; upserts
/// preserve the stored values. `last_used_at_ms` is refreshed on every touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRegistryRecord {
    /// Primary key; equals `container_name`.
    pub id: String,
    pub container_name: String,
    pub session_key: String,
    pub created_at_ms: i64,
    pub last_used_at_ms: i64,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_form() {
        let rec = SandboxRegistryRecord {
            id: "wopr-sbx-dev-12ab34cd".into(),
            container_name: "wopr-sbx-dev-12ab34cd".into(),
            session_key: "dev".into(),
            created_at_ms: 1_700_000_000_000,
            last_used_at_ms: 1_700_000_100_000,
            image: "wopr-sandbox:latest".into(),
            config_hash: None,
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"containerName\""));
        assert!(json.contains("\"lastUsedAtMs\""));
        assert!(!json.contains("configHash"));

        let back: SandboxRegistryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
