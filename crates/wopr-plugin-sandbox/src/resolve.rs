//! Effective-configuration resolution.
//!
//! Settings arrive as partials in three layers: hard-coded defaults, the
//! host's global `sandbox` section, and a per-session `sessions[].sandbox`
//! section. Precedence is session > global > default, applied field-wise.
//! `env` and `ulimits` shallow-merge when the session layer provides them;
//! `binds` concatenate global-then-session. A session's trust level can
//! force stricter settings than any config layer asks for.

use crate::home;
use crate::naming;
use crate::runtime::runtime;
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;
use wopr_sandbox_types::{
    SandboxConfig, SandboxDockerConfig, SandboxDockerConfigPatch, SandboxMode, SandboxPruneConfig,
    SandboxPruneConfigPatch, SandboxResult, SandboxScope, SandboxSettings, SandboxToolPolicy,
    SandboxWorkspaceInfo, TrustLevel, WorkspaceAccess, DEFAULT_TOOL_ALLOW, DEFAULT_TOOL_DENY,
};

/// Explicit scope wins; otherwise `perSession` decides; default is
/// per-session containers.
pub fn resolve_sandbox_scope(
    scope: Option<SandboxScope>,
    per_session: Option<bool>,
) -> SandboxScope {
    if let Some(scope) = scope {
        return scope;
    }
    match per_session {
        Some(false) => SandboxScope::Shared,
        _ => SandboxScope::Session,
    }
}

/// Field-wise Docker config merge: session > global > defaults.
pub fn resolve_sandbox_docker_config(
    global: Option<&SandboxDockerConfigPatch>,
    session: Option<&SandboxDockerConfigPatch>,
) -> SandboxDockerConfig {
    let defaults = SandboxDockerConfig::default();
    let g = global.cloned().unwrap_or_default();
    let s = session.cloned().unwrap_or_default();

    // env: a session env shallow-merges over the global env (or the default)
    let base_env = g.env.unwrap_or_else(|| defaults.env.clone());
    let env = match s.env {
        Some(session_env) => {
            let mut merged = base_env;
            merged.extend(session_env);
            merged
        }
        None => base_env,
    };

    // labels: session entries shallow-merge over global entries
    let labels = match s.labels {
        Some(session_labels) => {
            let mut merged = g.labels.unwrap_or_default();
            merged.extend(session_labels);
            merged
        }
        None => g.labels.unwrap_or_default(),
    };

    // ulimits: session entries shallow-merge over global entries
    let ulimits = match s.ulimits {
        Some(session_ulimits) => {
            let mut merged = g.ulimits.unwrap_or_default();
            merged.extend(session_ulimits);
            Some(merged)
        }
        None => g.ulimits,
    };

    // binds: concatenation global-then-session; empty result is omitted
    let mut binds: Vec<String> = Vec::new();
    binds.extend(g.binds.unwrap_or_default());
    binds.extend(s.binds.unwrap_or_default());
    let binds = if binds.is_empty() { None } else { Some(binds) };

    SandboxDockerConfig {
        image: s.image.or(g.image).unwrap_or(defaults.image),
        container_prefix: s
            .container_prefix
            .or(g.container_prefix)
            .unwrap_or(defaults.container_prefix),
        workdir: s.workdir.or(g.workdir).unwrap_or(defaults.workdir),
        read_only_root: s
            .read_only_root
            .or(g.read_only_root)
            .unwrap_or(defaults.read_only_root),
        tmpfs: s.tmpfs.or(g.tmpfs).unwrap_or(defaults.tmpfs),
        network: s.network.or(g.network).unwrap_or(defaults.network),
        user: s.user.or(g.user),
        cap_drop: s.cap_drop.or(g.cap_drop).unwrap_or(defaults.cap_drop),
        env,
        labels,
        setup_command: s.setup_command.or(g.setup_command),
        pids_limit: s.pids_limit.or(g.pids_limit).or(defaults.pids_limit),
        memory: s.memory.or(g.memory).or(defaults.memory),
        memory_swap: s.memory_swap.or(g.memory_swap).or(defaults.memory_swap),
        cpus: s.cpus.or(g.cpus).or(defaults.cpus),
        ulimits,
        seccomp_profile: s.seccomp_profile.or(g.seccomp_profile),
        apparmor_profile: s.apparmor_profile.or(g.apparmor_profile),
        dns: s.dns.or(g.dns),
        extra_hosts: s.extra_hosts.or(g.extra_hosts),
        binds,
    }
}

/// Field-wise prune config merge: session > global > defaults.
pub fn resolve_sandbox_prune_config(
    global: Option<&SandboxPruneConfigPatch>,
    session: Option<&SandboxPruneConfigPatch>,
) -> SandboxPruneConfig {
    let defaults = SandboxPruneConfig::default();
    let g = global.copied().unwrap_or_default();
    let s = session.copied().unwrap_or_default();
    SandboxPruneConfig {
        idle_hours: s
            .idle_hours
            .or(g.idle_hours)
            .unwrap_or(defaults.idle_hours),
        max_age_days: s
            .max_age_days
            .or(g.max_age_days)
            .unwrap_or(defaults.max_age_days),
    }
}

/// Where a resolved tool list came from, with the config key path an
/// operator would edit to change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolListSource {
    Session,
    Global,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolListOrigin {
    pub source: ToolListSource,
    pub key_path: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedToolPolicy {
    pub policy: SandboxToolPolicy,
    pub allow_origin: ToolListOrigin,
    pub deny_origin: ToolListOrigin,
}

fn pick_tool_list(
    session: Option<&Vec<String>>,
    global: Option<&Vec<String>>,
    default: &[&str],
    session_path: &'static str,
    global_path: &'static str,
) -> (Vec<String>, ToolListOrigin) {
    if let Some(list) = session {
        return (
            list.clone(),
            ToolListOrigin {
                source: ToolListSource::Session,
                key_path: session_path,
            },
        );
    }
    if let Some(list) = global {
        return (
            list.clone(),
            ToolListOrigin {
                source: ToolListSource::Global,
                key_path: global_path,
            },
        );
    }
    (
        default.iter().map(|s| s.to_string()).collect(),
        ToolListOrigin {
            source: ToolListSource::Default,
            key_path: global_path,
        },
    )
}

/// Allow and deny resolve independently: session list wins, else global,
/// else the built-in defaults.
pub fn resolve_sandbox_tools(
    global: Option<&SandboxToolPolicy>,
    session: Option<&SandboxToolPolicy>,
) -> ResolvedToolPolicy {
    let (allow, allow_origin) = pick_tool_list(
        session.and_then(|p| p.allow.as_ref()),
        global.and_then(|p| p.allow.as_ref()),
        DEFAULT_TOOL_ALLOW,
        "sessions[].sandbox.tools.allow",
        "sandbox.tools.allow",
    );
    let (deny, deny_origin) = pick_tool_list(
        session.and_then(|p| p.deny.as_ref()),
        global.and_then(|p| p.deny.as_ref()),
        DEFAULT_TOOL_DENY,
        "sessions[].sandbox.tools.deny",
        "sandbox.tools.deny",
    );
    ResolvedToolPolicy {
        policy: SandboxToolPolicy {
            allow: Some(allow),
            deny: Some(deny),
        },
        allow_origin,
        deny_origin,
    }
}

/// Parse one sandbox settings section; a malformed section degrades to empty
/// with a warning rather than failing resolution.
fn parse_settings_section(value: Option<&Value>, key_path: &str) -> SandboxSettings {
    let Some(value) = value else {
        return SandboxSettings::default();
    };
    match serde_json::from_value::<SandboxSettings>(value.clone()) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = key_path, error = %e, "Malformed sandbox config section; ignoring");
            SandboxSettings::default()
        }
    }
}

/// Extract the global and per-session sandbox partials from the host's
/// merged config.
fn read_host_settings(main: &Value, session_name: &str) -> (SandboxSettings, SandboxSettings) {
    let global = parse_settings_section(main.get("sandbox"), "sandbox");
    let session_section = main
        .get("sessions")
        .and_then(Value::as_array)
        .and_then(|sessions| {
            sessions
                .iter()
                .find(|s| s.get("name").and_then(Value::as_str) == Some(session_name))
        })
        .and_then(|s| s.get("sandbox"));
    let session = parse_settings_section(session_section, "sessions[].sandbox");
    (global, session)
}

/// Resolve the full sandbox envelope for one session against an explicit
/// host config value.
pub fn resolve_sandbox_config_from(
    main: &Value,
    session_name: &str,
    trust_level: Option<TrustLevel>,
) -> SandboxConfig {
    let (global, session) = read_host_settings(main, session_name);

    let mut mode = global.mode.unwrap_or_default();
    if matches!(
        trust_level,
        Some(TrustLevel::Untrusted) | Some(TrustLevel::SemiTrusted)
    ) {
        mode = SandboxMode::All;
    }

    let workspace_access = match trust_level {
        Some(TrustLevel::Untrusted) => WorkspaceAccess::None,
        Some(TrustLevel::SemiTrusted) => WorkspaceAccess::Ro,
        _ => session
            .workspace_access
            .or(global.workspace_access)
            .unwrap_or_default(),
    };

    let scope = resolve_sandbox_scope(
        session.scope.or(global.scope),
        session.per_session.or(global.per_session),
    );

    let workspace_root = global
        .workspace_root
        .map(PathBuf::from)
        .unwrap_or_else(home::default_workspace_root);

    SandboxConfig {
        mode,
        scope,
        workspace_access,
        workspace_root,
        docker: resolve_sandbox_docker_config(global.docker.as_ref(), session.docker.as_ref()),
        tools: resolve_sandbox_tools(global.tools.as_ref(), session.tools.as_ref()).policy,
        prune: resolve_sandbox_prune_config(global.prune.as_ref(), session.prune.as_ref()),
    }
}

/// Resolve the full sandbox envelope using the host config getter.
pub fn resolve_sandbox_config(
    session_name: &str,
    trust_level: Option<TrustLevel>,
) -> SandboxResult<SandboxConfig> {
    let main = runtime()?.main_config();
    Ok(resolve_sandbox_config_from(&main, session_name, trust_level))
}

/// Whether `mode` sandboxes this session.
pub fn mode_applies_to(mode: SandboxMode, session_name: &str) -> bool {
    match mode {
        SandboxMode::Off => false,
        SandboxMode::All => true,
        SandboxMode::NonMain => session_name != naming::MAIN_SCOPE_KEY,
    }
}

/// Whether this session should be sandboxed under the current host config.
pub fn should_sandbox(session_name: &str, trust_level: Option<TrustLevel>) -> SandboxResult<bool> {
    let cfg = resolve_sandbox_config(session_name, trust_level)?;
    Ok(mode_applies_to(cfg.mode, session_name))
}

/// Workspace decision and paths for a session, without touching Docker.
pub fn workspace_info_for(cfg: &SandboxConfig, session_name: &str) -> SandboxWorkspaceInfo {
    let scope_key = naming::resolve_sandbox_scope_key(cfg.scope, session_name);
    let workspace_dir = match cfg.scope {
        SandboxScope::Shared => cfg.workspace_root.clone(),
        SandboxScope::Session => {
            naming::resolve_sandbox_workspace_dir(&cfg.workspace_root, &scope_key)
        }
    };
    SandboxWorkspaceInfo {
        enabled: mode_applies_to(cfg.mode, session_name),
        scope_key,
        workspace_dir,
        workspace_access: cfg.workspace_access,
    }
}
