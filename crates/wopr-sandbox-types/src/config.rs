//! Sandbox configuration: constants, partials, and the resolved envelope.
//!
//! Configuration arrives in layers: hard-coded defaults, the host's global
//! `sandbox` section, and a per-session `sessions[].sandbox` section. Each
//! layer is a partial (`SandboxSettings` / `SandboxDockerConfigPatch`); the
//! plugin's resolver merges them field-wise with session > global > default
//! precedence. All wire forms are camelCase JSON, matching the host's merged
//! config object and the legacy registry file.

use crate::serde_compat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Image used when the operator configures nothing. Provisioned on demand by
/// pulling [`SANDBOX_BASE_IMAGE`] and re-tagging it.
pub const DEFAULT_SANDBOX_IMAGE: &str = "wopr-sandbox:latest";

/// Upstream image pulled to satisfy a missing [`DEFAULT_SANDBOX_IMAGE`].
pub const SANDBOX_BASE_IMAGE: &str = "debian:bookworm-slim";

/// Prefix for container names derived from session keys.
pub const DEFAULT_CONTAINER_PREFIX: &str = "wopr-sbx-";

/// Working directory inside the container; also the workspace mount target.
pub const DEFAULT_WORKDIR: &str = "/workspace";

/// Docker caps container names at 63 characters.
pub const CONTAINER_NAME_MAX_LEN: usize = 63;

/// Containers idle longer than this many hours are pruned.
pub const DEFAULT_IDLE_HOURS: u64 = 24;

/// Containers older than this many days are pruned regardless of use.
pub const DEFAULT_MAX_AGE_DAYS: u64 = 7;

/// Minimum wall-clock gap between two prune passes.
pub const PRUNE_DEBOUNCE_MS: i64 = 5 * 60 * 1000;

/// Window after `lastUsedAtMs` during which config drift is flagged but a
/// running container is never recreated.
pub const HOT_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Default tool allow list: everything not denied.
pub const DEFAULT_TOOL_ALLOW: &[&str] = &["*"];

/// Default tool deny list: a sandboxed session must not drive the sandbox
/// management surface itself.
pub const DEFAULT_TOOL_DENY: &[&str] = &["sandbox_*"];

/// Whether sessions are sandboxed at all, and which ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    /// No session is sandboxed.
    #[default]
    Off,
    /// Every session except `"main"` is sandboxed.
    NonMain,
    /// Every session is sandboxed.
    All,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::NonMain => write!(f, "non-main"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Container sharing granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxScope {
    /// One container per session.
    #[default]
    Session,
    /// One container shared by every session on this node.
    Shared,
}

impl std::fmt::Display for SandboxScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// How the per-session host workspace directory is mounted into the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceAccess {
    /// No mount at all.
    #[default]
    None,
    /// Read-only bind mount.
    Ro,
    /// Read-write bind mount.
    Rw,
}

impl std::fmt::Display for WorkspaceAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Ro => write!(f, "ro"),
            Self::Rw => write!(f, "rw"),
        }
    }
}

/// Trust level the host assigns to a session. Lower trust forces stricter
/// sandbox settings during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    Trusted,
    SemiTrusted,
    Untrusted,
}

/// Docker size literal: either a string like `"512m"` or a raw byte count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeLiteral {
    Num(serde_json::Number),
    Str(String),
}

impl std::fmt::Display for SizeLiteral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Soft/hard pair form of a ulimit entry. Either side may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UlimitPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard: Option<i64>,
}

/// A ulimit value: a single number/string, or a `{soft, hard}` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UlimitValue {
    Num(i64),
    Str(String),
    Pair(UlimitPair),
}

/// The post-merge container blueprint handed to the Docker driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxDockerConfig {
    pub image: String,
    pub container_prefix: String,
    pub workdir: String,
    pub read_only_root: bool,
    pub tmpfs: Vec<String>,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub cap_drop: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Extra container labels, stamped alongside the wopr-reserved ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<SizeLiteral>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_swap: Option<SizeLiteral>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ulimits: Option<BTreeMap<String, UlimitValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binds: Option<Vec<String>>,
}

impl Default for SandboxDockerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_SANDBOX_IMAGE.to_string(),
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
            workdir: DEFAULT_WORKDIR.to_string(),
            read_only_root: true,
            tmpfs: vec!["/tmp".into(), "/var/tmp".into(), "/run".into()],
            network: "none".to_string(),
            user: None,
            cap_drop: vec!["ALL".into()],
            env: BTreeMap::from([("LANG".to_string(), "C.UTF-8".to_string())]),
            labels: BTreeMap::new(),
            setup_command: None,
            pids_limit: Some(100),
            memory: Some(SizeLiteral::Str("512m".into())),
            memory_swap: Some(SizeLiteral::Str("512m".into())),
            cpus: Some(0.5),
            ulimits: None,
            seccomp_profile: None,
            apparmor_profile: None,
            dns: None,
            extra_hosts: None,
            binds: None,
        }
    }
}

/// Partial Docker config, as found in the host's global or per-session
/// `sandbox.docker` sections. Every field is optional; absent fields fall
/// through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxDockerConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_root: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmpfs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_drop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<SizeLiteral>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_swap: Option<SizeLiteral>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ulimits: Option<BTreeMap<String, UlimitValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binds: Option<Vec<String>>,
}

/// Tool allow/deny lists. An empty or absent allow list means
/// "allow everything not denied"; deny always wins. Malformed (non-array)
/// lists deserialize as absent rather than failing the whole config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxToolPolicy {
    #[serde(
        deserialize_with = "serde_compat::opt_string_vec_lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub allow: Option<Vec<String>>,
    #[serde(
        deserialize_with = "serde_compat::opt_string_vec_lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub deny: Option<Vec<String>>,
}

/// Resolved prune thresholds. A zero threshold disables that criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPruneConfig {
    pub idle_hours: u64,
    pub max_age_days: u64,
}

impl Default for SandboxPruneConfig {
    fn default() -> Self {
        Self {
            idle_hours: DEFAULT_IDLE_HOURS,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

/// Partial prune config from a host config layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxPruneConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_hours: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u64>,
}

/// One layer of sandbox settings, as read from the host's merged config:
/// the global `sandbox` section or a per-session `sessions[].sandbox`
/// section. `mode` and `workspaceRoot` are only meaningful at the global
/// layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SandboxMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<SandboxScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_session: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_access: Option<WorkspaceAccess>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker: Option<SandboxDockerConfigPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<SandboxToolPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prune: Option<SandboxPruneConfigPatch>,
}

/// The fully resolved sandbox envelope for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    pub scope: SandboxScope,
    pub workspace_access: WorkspaceAccess,
    pub workspace_root: PathBuf,
    pub docker: SandboxDockerConfig,
    pub tools: SandboxToolPolicy,
    pub prune: SandboxPruneConfig,
}

/// Everything a caller needs to execute work inside a sandboxed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxContext {
    pub enabled: bool,
    pub session_key: String,
    pub workspace_dir: PathBuf,
    pub workspace_access: WorkspaceAccess,
    pub container_name: String,
    pub container_workdir: String,
    pub docker: SandboxDockerConfig,
    pub tools: SandboxToolPolicy,
}

/// Workspace decision + paths for a session, without touching Docker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxWorkspaceInfo {
    pub enabled: bool,
    pub scope_key: String,
    pub workspace_dir: PathBuf,
    pub workspace_access: WorkspaceAccess,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_config_defaults() {
        let cfg = SandboxDockerConfig::default();
        assert_eq!(cfg.image, "wopr-sandbox:latest");
        assert_eq!(cfg.container_prefix, "wopr-sbx-");
        assert_eq!(cfg.workdir, "/workspace");
        assert!(cfg.read_only_root);
        assert_eq!(cfg.tmpfs, vec!["/tmp", "/var/tmp", "/run"]);
        assert_eq!(cfg.network, "none");
        assert_eq!(cfg.cap_drop, vec!["ALL"]);
        assert_eq!(cfg.env.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert!(cfg.labels.is_empty());
        assert_eq!(cfg.pids_limit, Some(100));
        assert_eq!(cfg.memory, Some(SizeLiteral::Str("512m".into())));
        assert_eq!(cfg.memory_swap, Some(SizeLiteral::Str("512m".into())));
        assert_eq!(cfg.cpus, Some(0.5));
        assert!(cfg.ulimits.is_none());
        assert!(cfg.binds.is_none());
    }

    #[test]
    fn test_mode_wire_form() {
        assert_eq!(
            serde_json::to_string(&SandboxMode::NonMain).unwrap(),
            "\"non-main\""
        );
        let m: SandboxMode = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(m, SandboxMode::All);
    }

    #[test]
    fn test_trust_level_wire_form() {
        let t: TrustLevel = serde_json::from_str("\"semi-trusted\"").unwrap();
        assert_eq!(t, TrustLevel::SemiTrusted);
    }

    #[test]
    fn test_size_literal_accepts_string_and_number() {
        let s: SizeLiteral = serde_json::from_str("\"256m\"").unwrap();
        assert_eq!(s, SizeLiteral::Str("256m".into()));
        let n: SizeLiteral = serde_json::from_str("1048576").unwrap();
        assert_eq!(n.to_string(), "1048576");
    }

    #[test]
    fn test_ulimit_value_forms() {
        let n: UlimitValue = serde_json::from_str("1024").unwrap();
        assert_eq!(n, UlimitValue::Num(1024));
        let p: UlimitValue = serde_json::from_str(r#"{"soft":1024,"hard":2048}"#).unwrap();
        assert_eq!(
            p,
            UlimitValue::Pair(UlimitPair {
                soft: Some(1024),
                hard: Some(2048)
            })
        );
    }

    #[test]
    fn test_docker_patch_unknown_layer_fields_absent() {
        let patch: SandboxDockerConfigPatch = serde_json::from_str(r#"{"network":"host"}"#).unwrap();
        assert_eq!(patch.network.as_deref(), Some("host"));
        assert!(patch.image.is_none());
        assert!(patch.env.is_none());
    }

    #[test]
    fn test_tool_policy_malformed_lists_treated_as_absent() {
        let p: SandboxToolPolicy =
            serde_json::from_str(r#"{"allow":"memory_*","deny":{"a":1}}"#).unwrap();
        assert!(p.allow.is_none());
        assert!(p.deny.is_none());
    }

    #[test]
    fn test_settings_camel_case_round_trip() {
        let json = r#"{
            "mode": "non-main",
            "perSession": false,
            "workspaceAccess": "ro",
            "docker": {"readOnlyRoot": false, "pidsLimit": 50},
            "prune": {"idleHours": 1}
        }"#;
        let s: SandboxSettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.mode, Some(SandboxMode::NonMain));
        assert_eq!(s.per_session, Some(false));
        assert_eq!(s.workspace_access, Some(WorkspaceAccess::Ro));
        let docker = s.docker.unwrap();
        assert_eq!(docker.read_only_root, Some(false));
        assert_eq!(docker.pids_limit, Some(50));
        assert_eq!(s.prune.unwrap().idle_hours, Some(1));
    }
}
