//! Container lifecycle orchestration.
//!
//! `ensure_sandbox_container` reconciles the desired config against the real
//! container: inspection is authoritative for existence and running state,
//! the registry is authoritative for creation time and the last known config
//! hash. A drifted container that was used within the last five minutes is
//! left alone; the operator gets a warning and an escape hatch instead of a
//! recreate under an active session.

use crate::config_hash::compute_sandbox_config_hash;
use crate::docker::{self, ContainerState, CreateContainerSpec};
use crate::naming::{resolve_sandbox_scope_key, slugify_session_key, SHARED_SCOPE_KEY};
use crate::registry::{self, RegistryUpdate};
use crate::storage::RecordTable;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info, warn};
use wopr_sandbox_types::{
    SandboxConfig, SandboxResult, SandboxScope, CONTAINER_NAME_MAX_LEN, HOT_WINDOW_MS,
};

/// Inputs to [`ensure_sandbox_container`].
#[derive(Debug, Clone)]
pub struct EnsureContainerRequest<'a> {
    pub session_key: &'a str,
    pub workspace_dir: &'a Path,
    pub cfg: &'a SandboxConfig,
}

/// Deterministic container name for a scope key under this config, capped at
/// Docker's 63-character limit.
pub fn container_name_for(cfg: &SandboxConfig, scope_key: &str) -> String {
    let slug = match cfg.scope {
        SandboxScope::Shared => SHARED_SCOPE_KEY.to_string(),
        SandboxScope::Session => slugify_session_key(scope_key),
    };
    let name = format!("{}{}", cfg.docker.container_prefix, slug);
    truncate_name(name, CONTAINER_NAME_MAX_LEN)
}

fn truncate_name(mut name: String, max: usize) -> String {
    if name.len() > max {
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// A drifted container is protected when it is running and was used within
/// the hot window; an unknown last-use time counts as recent.
fn within_hot_window(running: bool, last_used_at_ms: Option<i64>, now_ms: i64) -> bool {
    running && last_used_at_ms.map_or(true, |t| now_ms - t < HOT_WINDOW_MS)
}

/// Make sure the session's container exists, matches the effective config,
/// and is running; returns its name.
pub async fn ensure_sandbox_container(
    table: &dyn RecordTable,
    req: &EnsureContainerRequest<'_>,
) -> SandboxResult<String> {
    let cfg = req.cfg;
    let scope_key = resolve_sandbox_scope_key(cfg.scope, req.session_key);
    let container_name = container_name_for(cfg, &scope_key);
    let expected_hash =
        compute_sandbox_config_hash(&cfg.docker, cfg.workspace_access, req.workspace_dir)?;
    let now_ms = Utc::now().timestamp_millis();

    let mut state = docker::docker_container_state(&container_name).await?;
    let mut observed_hash = None;
    let mut hot_drift = false;

    if state.exists {
        let record = registry::find_registry_entry(table, &container_name)?;
        observed_hash = docker::read_container_config_hash(&container_name).await?;
        if observed_hash.is_none() {
            observed_hash = record.as_ref().and_then(|r| r.config_hash.clone());
        }
        let drifted = observed_hash.as_deref() != Some(expected_hash.as_str());
        if drifted {
            let last_used = record.as_ref().map(|r| r.last_used_at_ms);
            if within_hot_window(state.running, last_used, now_ms) {
                hot_drift = true;
                warn!(
                    container = %container_name,
                    "Sandbox config changed but the container was used within the last 5 minutes; \
                     keeping it as-is. Run `wopr sandbox recreate` to apply the new config."
                );
            } else {
                info!(container = %container_name, "Sandbox config drift detected; recreating");
                if let Err(e) = docker::remove_container(&container_name).await {
                    warn!(container = %container_name, error = %e, "Removal of drifted container failed; treating as absent");
                }
                state = ContainerState {
                    exists: false,
                    running: false,
                };
            }
        }
    }

    if !state.exists {
        debug!(container = %container_name, image = %cfg.docker.image, "Creating sandbox container");
        docker::create_container(&CreateContainerSpec {
            name: &container_name,
            cfg: &cfg.docker,
            scope_key: &scope_key,
            workspace_dir: req.workspace_dir,
            workspace_access: cfg.workspace_access,
            config_hash: Some(&expected_hash),
            created_at_ms: Some(now_ms),
        })
        .await?;
    } else if !state.running {
        docker::start_container(&container_name).await?;
    }

    // On a hot-window skip the registry keeps the hash that is actually on
    // the container, so the next cold check still sees the drift.
    let recorded_hash = if hot_drift {
        observed_hash
    } else {
        Some(expected_hash)
    };
    registry::update_registry(
        table,
        &RegistryUpdate {
            container_name: container_name.clone(),
            session_key: scope_key,
            created_at_ms: now_ms,
            last_used_at_ms: now_ms,
            image: cfg.docker.image.clone(),
            config_hash: recorded_hash,
        },
    )?;

    Ok(container_name)
}
