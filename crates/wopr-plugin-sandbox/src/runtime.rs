//! Process-wide runtime context injected by the host at plugin init.

use crate::storage::{PluginStorage, RecordTable, SANDBOX_REGISTRY_TABLE};
use std::sync::{Arc, OnceLock};
use tracing::warn;
use wopr_sandbox_types::{SandboxError, SandboxResult};

/// Getter for the host's merged configuration. The value is opaque; the
/// sandbox layer only reads its `sandbox` and `sessions` sections.
pub type MainConfigFn = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

pub struct RuntimeContext {
    registry: Arc<dyn RecordTable>,
    main_config: MainConfigFn,
}

impl RuntimeContext {
    /// Build the context, opening the registry table on the host's storage.
    pub fn new(storage: Arc<dyn PluginStorage>, main_config: MainConfigFn) -> SandboxResult<Self> {
        let registry = storage.table(&SANDBOX_REGISTRY_TABLE)?;
        Ok(Self {
            registry,
            main_config,
        })
    }

    pub fn registry(&self) -> &dyn RecordTable {
        self.registry.as_ref()
    }

    pub fn registry_handle(&self) -> Arc<dyn RecordTable> {
        Arc::clone(&self.registry)
    }

    pub fn main_config(&self) -> serde_json::Value {
        (self.main_config)()
    }
}

static RUNTIME: OnceLock<RuntimeContext> = OnceLock::new();

/// Install the host-provided context. Write-once; a repeated call is ignored
/// with a warning.
pub fn init_runtime(ctx: RuntimeContext) {
    if RUNTIME.set(ctx).is_err() {
        warn!("Sandbox runtime context already initialized; ignoring re-init");
    }
}

/// The installed context. Accessing it before init is a programmer error and
/// surfaces as `SandboxError::Internal`.
pub fn runtime() -> SandboxResult<&'static RuntimeContext> {
    RUNTIME
        .get()
        .ok_or_else(|| SandboxError::Internal("sandbox runtime not initialized".to_string()))
}
