//! Plugin manifest and host wiring.
//!
//! The host calls [`SandboxPlugin::init`] once with its storage handle and
//! config getter; the plugin wires the process-wide runtime context, imports
//! the legacy registry, and describes the `sandbox` extension namespace it
//! serves. `shutdown` is idempotent and best-effort.

use crate::docker;
use crate::home;
use crate::migrate;
use crate::prune;
use crate::runtime::{init_runtime, runtime, MainConfigFn, RuntimeContext};
use crate::storage::PluginStorage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use wopr_sandbox_types::SandboxResult;

pub const PLUGIN_NAME: &str = "wopr-plugin-sandbox";
pub const PLUGIN_VERSION: &str = "1.0.0";
pub const EXTENSION_NAMESPACE: &str = "sandbox";

/// Operations exposed under the `sandbox` extension namespace.
pub const EXTENSION_OPERATIONS: &[&str] = &[
    "resolveSandboxContext",
    "getSandboxWorkspaceInfo",
    "execInContainer",
    "execInContainerRaw",
    "execDocker",
    "shouldSandbox",
    "resolveSandboxConfig",
    "isToolAllowed",
    "filterToolsByPolicy",
    "pruneAllSandboxes",
];

/// Category taxonomy used by the host's plugin registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    Infrastructure,
}

/// Static description of this plugin for the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    pub capabilities: Vec<String>,
}

pub fn manifest() -> PluginManifest {
    PluginManifest {
        name: PLUGIN_NAME.to_string(),
        version: PLUGIN_VERSION.to_string(),
        category: PluginCategory::Infrastructure,
        capabilities: vec![EXTENSION_NAMESPACE.to_string()],
    }
}

/// Handles the host injects at init.
pub struct HostContext {
    pub storage: Arc<dyn PluginStorage>,
    pub main_config: MainConfigFn,
}

/// What the plugin registers with the host after init.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRegistration {
    pub namespace: &'static str,
    pub operations: Vec<&'static str>,
}

#[derive(Default)]
pub struct SandboxPlugin {
    shut_down: AtomicBool,
}

impl SandboxPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the runtime context, import the legacy registry, and probe the
    /// Docker daemon. A migration failure aborts init.
    pub async fn init(&self, host: HostContext) -> SandboxResult<ExtensionRegistration> {
        let ctx = RuntimeContext::new(host.storage, host.main_config)?;
        let registry = ctx.registry_handle();
        init_runtime(ctx);

        migrate::migrate_legacy_registry(&home::legacy_registry_path(), registry.as_ref())?;

        if !docker::is_docker_available().await {
            warn!("Docker is not available; sandboxed sessions will fail to start");
        }

        info!(plugin = PLUGIN_NAME, version = PLUGIN_VERSION, "Sandbox plugin initialized");
        Ok(ExtensionRegistration {
            namespace: EXTENSION_NAMESPACE,
            operations: EXTENSION_OPERATIONS.to_vec(),
        })
    }

    /// Idempotent, best-effort teardown of every sandbox container.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(rt) = runtime() else {
            return; // never initialized, nothing to tear down
        };
        match prune::prune_all(rt.registry()).await {
            Ok(removed) => info!(removed, "Sandbox plugin shut down"),
            Err(e) => warn!(error = %e, "Sandbox shutdown teardown failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use serde_json::json;

    #[test]
    fn test_manifest_shape() {
        let m = manifest();
        assert_eq!(m.name, "wopr-plugin-sandbox");
        assert_eq!(m.version, "1.0.0");
        assert_eq!(m.category, PluginCategory::Infrastructure);
        assert_eq!(m.capabilities, vec!["sandbox"]);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["category"], "infrastructure");
    }

    #[test]
    fn test_extension_surface_is_complete() {
        for op in [
            "resolveSandboxContext",
            "getSandboxWorkspaceInfo",
            "execInContainer",
            "execInContainerRaw",
            "execDocker",
            "shouldSandbox",
            "resolveSandboxConfig",
            "isToolAllowed",
            "filterToolsByPolicy",
            "pruneAllSandboxes",
        ] {
            assert!(EXTENSION_OPERATIONS.contains(&op), "missing {op}");
        }
        assert_eq!(EXTENSION_OPERATIONS.len(), 10);
    }

    // One test drives init + re-init + shutdown: the runtime slot is
    // process-global and can only be installed once per test binary.
    #[tokio::test]
    async fn test_init_registers_namespace_and_shutdown_is_idempotent() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let plugin = SandboxPlugin::new();
        let registration = plugin
            .init(HostContext {
                storage: storage.clone(),
                main_config: Arc::new(|| json!({})),
            })
            .await
            .unwrap();
        assert_eq!(registration.namespace, "sandbox");
        assert_eq!(registration.operations.len(), 10);

        // Re-init is ignored rather than clobbering the installed context
        let second = plugin
            .init(HostContext {
                storage,
                main_config: Arc::new(|| json!({})),
            })
            .await;
        assert!(second.is_ok());

        // With sandbox mode off, the top-level resolver declines
        let ctx = crate::context::resolve_sandbox_context("main", None)
            .await
            .unwrap();
        assert!(ctx.is_none());
        let info = crate::context::get_sandbox_workspace_info("main", None).unwrap();
        assert!(!info.enabled);

        plugin.shutdown().await;
        plugin.shutdown().await;
    }
}
