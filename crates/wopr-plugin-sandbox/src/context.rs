//! Top-level session entry points.

use crate::lifecycle::{ensure_sandbox_container, EnsureContainerRequest};
use crate::naming::{resolve_sandbox_scope_key, resolve_sandbox_workspace_dir};
use crate::prune;
use crate::resolve;
use crate::runtime::runtime;
use tracing::debug;
use wopr_sandbox_types::{
    SandboxContext, SandboxResult, SandboxScope, SandboxWorkspaceInfo, TrustLevel,
};

/// Resolve the sandbox context for a session: decide whether to sandbox at
/// all, prepare the workspace directory, and reconcile the container.
///
/// Returns `None` when the session is not sandboxed. May suspend on Docker,
/// the filesystem, and the repository.
pub async fn resolve_sandbox_context(
    session_name: &str,
    trust_level: Option<TrustLevel>,
) -> SandboxResult<Option<SandboxContext>> {
    if !resolve::should_sandbox(session_name, trust_level)? {
        debug!(session = session_name, "Session is not sandboxed");
        return Ok(None);
    }
    let cfg = resolve::resolve_sandbox_config(session_name, trust_level)?;
    let table = runtime()?.registry();

    prune::maybe_prune(table, &cfg.prune).await;

    let scope_key = resolve_sandbox_scope_key(cfg.scope, session_name);
    let workspace_dir = match cfg.scope {
        SandboxScope::Shared => cfg.workspace_root.clone(),
        SandboxScope::Session => resolve_sandbox_workspace_dir(&cfg.workspace_root, &scope_key),
    };
    tokio::fs::create_dir_all(&workspace_dir).await?;

    let container_name = ensure_sandbox_container(
        table,
        &EnsureContainerRequest {
            session_key: session_name,
            workspace_dir: &workspace_dir,
            cfg: &cfg,
        },
    )
    .await?;

    Ok(Some(SandboxContext {
        enabled: true,
        session_key: scope_key,
        workspace_dir,
        workspace_access: cfg.workspace_access,
        container_name,
        container_workdir: cfg.docker.workdir.clone(),
        docker: cfg.docker,
        tools: cfg.tools,
    }))
}

/// The sandbox decision and workspace paths for a session, without touching
/// Docker or the filesystem.
pub fn get_sandbox_workspace_info(
    session_name: &str,
    trust_level: Option<TrustLevel>,
) -> SandboxResult<SandboxWorkspaceInfo> {
    let cfg = resolve::resolve_sandbox_config(session_name, trust_level)?;
    Ok(resolve::workspace_info_for(&cfg, session_name))
}

/// Tear down every known sandbox container; returns the number removed.
pub async fn prune_all_sandboxes() -> SandboxResult<usize> {
    prune::prune_all(runtime()?.registry()).await
}
