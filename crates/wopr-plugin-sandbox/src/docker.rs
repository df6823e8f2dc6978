//! Docker CLI driver.
//!
//! Every container operation shells out to `docker` with piped stdio. The
//! CLI's textual output is part of the contract: the `"No such image"`
//! stderr sentinel and the `<no value>` inspect placeholder are matched as
//! constants here and nowhere else.

use crate::shell::{validate_command, validate_env_key};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use wopr_sandbox_types::{
    SandboxDockerConfig, SandboxError, SandboxResult, SizeLiteral, UlimitValue, WorkspaceAccess,
    DEFAULT_SANDBOX_IMAGE, SANDBOX_BASE_IMAGE,
};

/// stderr sentinel printed by `docker image inspect` for a missing image.
const NO_SUCH_IMAGE: &str = "No such image";

/// Placeholder printed by `docker inspect -f` for an absent label.
const NO_VALUE: &str = "<no value>";

/// Exit code reported when a per-call timeout kills the Docker client.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Captured stdout/stderr beyond this many bytes is truncated.
const MAX_CAPTURED_OUTPUT: usize = 50_000;

/// Raw result of a `docker` invocation.
#[derive(Debug, Clone)]
pub struct DockerOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Result of executing a command inside a container.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub exists: bool,
    pub running: bool,
}

/// Options for [`exec_in_container`] / [`exec_in_container_raw`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Per-call timeout in seconds; the Docker client is killed on expiry.
    pub timeout_secs: Option<u64>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn truncate_output(mut s: String) -> String {
    if s.len() > MAX_CAPTURED_OUTPUT {
        let total = s.len();
        let mut end = MAX_CAPTURED_OUTPUT;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
        s.push_str(&format!("... [truncated, {total} total bytes]"));
    }
    s
}

/// Check whether the Docker daemon is reachable.
pub async fn is_docker_available() -> bool {
    Command::new("docker")
        .args(["version", "--format", "{{.Server.Version}}"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run `docker` with the given arguments, capturing stdout and stderr.
///
/// With `allow_failure`, a non-zero (or unspawnable) invocation resolves to
/// a [`DockerOutput`] carrying the exit code; otherwise it becomes an error
/// carrying the trimmed stderr.
pub async fn exec_docker(args: &[String], allow_failure: bool) -> SandboxResult<DockerOutput> {
    debug!(args = ?args, "docker");
    let spawned = Command::new("docker")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;
    let output = match spawned {
        Ok(output) => output,
        Err(e) => {
            if allow_failure {
                return Ok(DockerOutput {
                    stdout: String::new(),
                    stderr: e.to_string(),
                    code: 1,
                });
            }
            return Err(SandboxError::Docker(format!("failed to spawn docker: {e}")));
        }
    };

    let stdout = truncate_output(String::from_utf8_lossy(&output.stdout).into_owned());
    let stderr = truncate_output(String::from_utf8_lossy(&output.stderr).into_owned());
    let code = output.status.code().unwrap_or(1);
    if code != 0 && !allow_failure {
        let trimmed = stderr.trim();
        let message = if trimmed.is_empty() {
            format!(
                "docker {} exited with code {code}",
                args.first().map(String::as_str).unwrap_or("")
            )
        } else {
            trimmed.to_string()
        };
        return Err(SandboxError::Docker(message));
    }
    Ok(DockerOutput {
        stdout,
        stderr,
        code,
    })
}

/// Validate a Docker image reference: alphanumerics plus `.:/-_@`.
fn validate_image_ref(image: &str) -> SandboxResult<()> {
    if image.is_empty() {
        return Err(SandboxError::InvalidInput(
            "image reference is empty".to_string(),
        ));
    }
    if !image
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || ".:/-_@".contains(c))
    {
        return Err(SandboxError::InvalidInput(format!(
            "invalid image reference: {image}"
        )));
    }
    Ok(())
}

/// Whether `image` is available locally.
pub async fn docker_image_exists(image: &str) -> SandboxResult<bool> {
    let out = exec_docker(&argv(&["image", "inspect", image]), true).await?;
    if out.code == 0 {
        return Ok(true);
    }
    if out.stderr.contains(NO_SUCH_IMAGE) {
        return Ok(false);
    }
    Err(SandboxError::Docker(out.stderr.trim().to_string()))
}

/// Make sure `image` is locally available. The default image is provisioned
/// by pulling the base image and re-tagging it; any other missing image is
/// the operator's to provide.
pub async fn ensure_docker_image(image: &str) -> SandboxResult<()> {
    validate_image_ref(image)?;
    if docker_image_exists(image).await? {
        return Ok(());
    }
    if image != DEFAULT_SANDBOX_IMAGE {
        return Err(SandboxError::ImageNotAvailable(format!(
            "{image} is not available locally; pull or build it before enabling the sandbox"
        )));
    }
    info!(image, base = SANDBOX_BASE_IMAGE, "Provisioning default sandbox image");
    exec_docker(&argv(&["pull", SANDBOX_BASE_IMAGE]), false).await?;
    exec_docker(
        &argv(&["tag", SANDBOX_BASE_IMAGE, DEFAULT_SANDBOX_IMAGE]),
        false,
    )
    .await?;
    Ok(())
}

/// Existence and running state of a container.
pub async fn docker_container_state(name: &str) -> SandboxResult<ContainerState> {
    let out = exec_docker(&argv(&["inspect", "-f", "{{.State.Running}}", name]), true).await?;
    if out.code != 0 {
        return Ok(ContainerState {
            exists: false,
            running: false,
        });
    }
    Ok(ContainerState {
        exists: true,
        running: out.stdout.trim() == "true",
    })
}

/// Read the config-hash label off an existing container, if any.
pub async fn read_container_config_hash(name: &str) -> SandboxResult<Option<String>> {
    let out = exec_docker(
        &argv(&[
            "inspect",
            "-f",
            r#"{{index .Config.Labels "wopr.configHash"}}"#,
            name,
        ]),
        true,
    )
    .await?;
    if out.code != 0 {
        return Ok(None);
    }
    let value = out.stdout.trim();
    if value.is_empty() || value == NO_VALUE {
        Ok(None)
    } else {
        Ok(Some(value.to_string()))
    }
}

/// Inputs to [`build_sandbox_create_args`].
#[derive(Debug, Clone)]
pub struct CreateArgsSpec<'a> {
    pub name: &'a str,
    pub cfg: &'a SandboxDockerConfig,
    pub scope_key: &'a str,
    /// Stamped into the `wopr.createdAtMs` label; defaults to now.
    pub created_at_ms: Option<i64>,
    pub labels: Option<&'a BTreeMap<String, String>>,
    pub config_hash: Option<&'a str>,
}

fn push_label(args: &mut Vec<String>, key: &str, value: &str) {
    args.push("--label".to_string());
    args.push(format!("{key}={value}"));
}

fn push_size(args: &mut Vec<String>, flag: &str, size: &SizeLiteral) {
    let value = size.to_string();
    let value = value.trim();
    if !value.is_empty() {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// `--ulimit` value grammar: `name=value`, or `name=soft:hard` with either
/// side optional (negative pair values clamp to 0). Returns None when the
/// entry carries nothing emittable.
fn format_ulimit(name: &str, value: &UlimitValue) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    match value {
        UlimitValue::Num(n) => Some(format!("{name}={n}")),
        UlimitValue::Str(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(format!("{name}={s}"))
            }
        }
        UlimitValue::Pair(pair) => match (pair.soft, pair.hard) {
            (None, None) => None,
            (Some(soft), Some(hard)) => Some(format!("{name}={}:{}", soft.max(0), hard.max(0))),
            (Some(soft), None) => Some(format!("{name}={}", soft.max(0))),
            (None, Some(hard)) => Some(format!("{name}={}", hard.max(0))),
        },
    }
}

/// Assemble the `docker create` argument vector for a sandbox container.
/// Deterministic for identical inputs.
pub fn build_sandbox_create_args(spec: &CreateArgsSpec<'_>) -> Vec<String> {
    let cfg = spec.cfg;
    let mut args = argv(&["create", "--name"]);
    args.push(spec.name.to_string());

    let created_at_ms = spec
        .created_at_ms
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    push_label(&mut args, "wopr.sandbox", "1");
    push_label(&mut args, "wopr.sessionKey", spec.scope_key);
    push_label(&mut args, "wopr.createdAtMs", &created_at_ms.to_string());
    if let Some(hash) = spec.config_hash {
        push_label(&mut args, "wopr.configHash", hash);
    }
    if let Some(labels) = spec.labels {
        for (key, value) in labels {
            if !key.is_empty() && !value.is_empty() {
                push_label(&mut args, key, value);
            }
        }
    }

    if cfg.read_only_root {
        args.push("--read-only".to_string());
    }
    for target in &cfg.tmpfs {
        args.push("--tmpfs".to_string());
        args.push(target.clone());
    }
    if !cfg.network.is_empty() {
        args.push("--network".to_string());
        args.push(cfg.network.clone());
    }
    if let Some(user) = &cfg.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }
    for cap in &cfg.cap_drop {
        args.push("--cap-drop".to_string());
        args.push(cap.clone());
    }
    for (key, value) in &cfg.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push("--security-opt".to_string());
    args.push("no-new-privileges".to_string());
    if let Some(profile) = &cfg.seccomp_profile {
        args.push("--security-opt".to_string());
        args.push(format!("seccomp={profile}"));
    }
    if let Some(profile) = &cfg.apparmor_profile {
        args.push("--security-opt".to_string());
        args.push(format!("apparmor={profile}"));
    }
    for server in cfg.dns.iter().flatten() {
        let server = server.trim();
        if !server.is_empty() {
            args.push("--dns".to_string());
            args.push(server.to_string());
        }
    }
    for host in cfg.extra_hosts.iter().flatten() {
        let host = host.trim();
        if !host.is_empty() {
            args.push("--add-host".to_string());
            args.push(host.to_string());
        }
    }
    if let Some(limit) = cfg.pids_limit {
        if limit > 0 {
            args.push("--pids-limit".to_string());
            args.push(limit.to_string());
        }
    }
    if let Some(memory) = &cfg.memory {
        push_size(&mut args, "--memory", memory);
    }
    if let Some(swap) = &cfg.memory_swap {
        push_size(&mut args, "--memory-swap", swap);
    }
    if let Some(cpus) = cfg.cpus {
        if cpus > 0.0 {
            args.push("--cpus".to_string());
            args.push(cpus.to_string());
        }
    }
    if let Some(ulimits) = &cfg.ulimits {
        for (name, value) in ulimits {
            if let Some(flag) = format_ulimit(name, value) {
                args.push("--ulimit".to_string());
                args.push(flag);
            }
        }
    }
    for bind in cfg.binds.iter().flatten() {
        args.push("-v".to_string());
        args.push(bind.clone());
    }
    args
}

/// Inputs to [`create_container`].
#[derive(Debug, Clone)]
pub struct CreateContainerSpec<'a> {
    pub name: &'a str,
    pub cfg: &'a SandboxDockerConfig,
    pub scope_key: &'a str,
    pub workspace_dir: &'a Path,
    pub workspace_access: WorkspaceAccess,
    pub config_hash: Option<&'a str>,
    pub created_at_ms: Option<i64>,
}

/// The complete `docker create` invocation: flag grammar, workdir, workspace
/// mount, image, and the keep-alive command.
fn build_create_invocation(spec: &CreateContainerSpec<'_>) -> Vec<String> {
    let mut args = build_sandbox_create_args(&CreateArgsSpec {
        name: spec.name,
        cfg: spec.cfg,
        scope_key: spec.scope_key,
        created_at_ms: spec.created_at_ms,
        labels: Some(&spec.cfg.labels),
        config_hash: spec.config_hash,
    });
    args.push("--workdir".to_string());
    args.push(spec.cfg.workdir.clone());
    let workspace = spec.workspace_dir.display();
    match spec.workspace_access {
        WorkspaceAccess::None => {}
        WorkspaceAccess::Ro => {
            args.push("-v".to_string());
            args.push(format!("{workspace}:{}:ro", spec.cfg.workdir));
        }
        WorkspaceAccess::Rw => {
            args.push("-v".to_string());
            args.push(format!("{workspace}:{}", spec.cfg.workdir));
        }
    }
    args.push(spec.cfg.image.clone());
    args.push("sleep".to_string());
    args.push("infinity".to_string());
    args
}

/// Create and start a sandbox container, then run the configured setup
/// command, if any.
pub async fn create_container(spec: &CreateContainerSpec<'_>) -> SandboxResult<()> {
    ensure_docker_image(&spec.cfg.image).await?;
    let args = build_create_invocation(spec);
    exec_docker(&args, false).await?;
    start_container(spec.name).await?;

    if let Some(setup) = spec.cfg.setup_command.as_deref() {
        if !setup.trim().is_empty() {
            let command = validate_command(setup)?;
            info!(container = spec.name, "Running sandbox setup command");
            let mut exec_args = argv(&["exec", "-i"]);
            exec_args.push(spec.name.to_string());
            exec_args.extend(argv(&["sh", "-c", "--"]));
            exec_args.push(command);
            exec_docker(&exec_args, false).await?;
        }
    }
    Ok(())
}

pub async fn start_container(name: &str) -> SandboxResult<()> {
    exec_docker(&argv(&["start", name]), false).await?;
    Ok(())
}

/// Force-remove a container. Callers decide whether failure matters.
pub async fn remove_container(name: &str) -> SandboxResult<()> {
    let out = exec_docker(&argv(&["rm", "-f", name]), true).await?;
    if out.code != 0 {
        return Err(SandboxError::Docker(out.stderr.trim().to_string()));
    }
    Ok(())
}

fn build_exec_args(name: &str, opts: &ExecOptions, tail: &[String]) -> Vec<String> {
    let mut args = argv(&["exec", "-i"]);
    if let Some(workdir) = &opts.workdir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }
    for (key, value) in &opts.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(name.to_string());
    args.extend(tail.iter().cloned());
    args
}

/// Execute a shell command inside a running container via `sh -c`.
///
/// The command is validated against shell metacharacters first; environment
/// keys are passed through as given.
pub async fn exec_in_container(
    name: &str,
    command: &str,
    opts: &ExecOptions,
) -> SandboxResult<ExecResult> {
    let command = validate_command(command)?;
    let mut tail = argv(&["sh", "-c", "--"]);
    tail.push(command);
    let args = build_exec_args(name, opts, &tail);
    run_docker_exec(&args, opts.timeout_secs).await
}

/// Execute an argv directly inside a running container, bypassing any shell.
/// Environment keys are validated as POSIX identifiers.
pub async fn exec_in_container_raw(
    name: &str,
    command_argv: &[String],
    opts: &ExecOptions,
) -> SandboxResult<ExecResult> {
    if command_argv.is_empty() {
        return Err(SandboxError::InvalidInput("argv is empty".to_string()));
    }
    for key in opts.env.keys() {
        validate_env_key(key)?;
    }
    let args = build_exec_args(name, opts, command_argv);
    run_docker_exec(&args, opts.timeout_secs).await
}

async fn run_docker_exec(args: &[String], timeout_secs: Option<u64>) -> SandboxResult<ExecResult> {
    debug!(args = ?args, "docker exec");
    let mut command = Command::new("docker");
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout_secs {
        Some(secs) => {
            match tokio::time::timeout(Duration::from_secs(secs), command.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs = secs, "In-container exec timed out; killing docker client");
                    return Ok(ExecResult {
                        stdout: String::new(),
                        stderr: format!("timed out after {secs}s"),
                        exit_code: TIMEOUT_EXIT_CODE,
                    });
                }
            }
        }
        None => command.output().await,
    };
    let output = output.map_err(|e| SandboxError::Docker(format!("failed to spawn docker: {e}")))?;

    Ok(ExecResult {
        stdout: truncate_output(String::from_utf8_lossy(&output.stdout).into_owned()),
        stderr: truncate_output(String::from_utf8_lossy(&output.stderr).into_owned()),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wopr_sandbox_types::UlimitPair;

    fn pairs(args: &[String]) -> Vec<(String, String)> {
        args.windows(2).map(|w| (w[0].clone(), w[1].clone())).collect()
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        pairs(args).contains(&(flag.to_string(), value.to_string()))
    }

    fn spec_cfg() -> SandboxDockerConfig {
        SandboxDockerConfig {
            tmpfs: vec!["/tmp".into(), "/var/tmp".into()],
            pids_limit: Some(50),
            memory: Some(SizeLiteral::Str("256m".into())),
            memory_swap: None,
            cpus: Some(1.5),
            ulimits: Some(std::collections::BTreeMap::from([(
                "nofile".to_string(),
                UlimitValue::Pair(UlimitPair {
                    soft: Some(1024),
                    hard: Some(2048),
                }),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_args_contract() {
        let cfg = spec_cfg();
        let args = build_sandbox_create_args(&CreateArgsSpec {
            name: "wopr-sbx-dev",
            cfg: &cfg,
            scope_key: "dev",
            created_at_ms: Some(1_700_000_000_000),
            labels: None,
            config_hash: Some("abc123"),
        });

        assert_eq!(&args[..3], &["create", "--name", "wopr-sbx-dev"]);
        assert!(args.contains(&"--read-only".to_string()));
        assert!(has_pair(&args, "--tmpfs", "/tmp"));
        assert!(has_pair(&args, "--tmpfs", "/var/tmp"));
        assert!(has_pair(&args, "--pids-limit", "50"));
        assert!(has_pair(&args, "--memory", "256m"));
        assert!(has_pair(&args, "--cpus", "1.5"));
        assert!(has_pair(&args, "--ulimit", "nofile=1024:2048"));
        assert!(has_pair(&args, "--security-opt", "no-new-privileges"));
        assert!(has_pair(&args, "--network", "none"));
        assert!(has_pair(&args, "--cap-drop", "ALL"));
        assert!(has_pair(&args, "--label", "wopr.sandbox=1"));
        assert!(has_pair(&args, "--label", "wopr.sessionKey=dev"));
        assert!(has_pair(&args, "--label", "wopr.createdAtMs=1700000000000"));
        assert!(has_pair(&args, "--label", "wopr.configHash=abc123"));
        assert!(has_pair(&args, "-e", "LANG=C.UTF-8"));
    }

    #[test]
    fn test_create_args_deterministic() {
        let cfg = spec_cfg();
        let spec = CreateArgsSpec {
            name: "c",
            cfg: &cfg,
            scope_key: "dev",
            created_at_ms: Some(42),
            labels: None,
            config_hash: Some("h"),
        };
        assert_eq!(build_sandbox_create_args(&spec), build_sandbox_create_args(&spec));
    }

    #[test]
    fn test_create_args_omissions() {
        let cfg = SandboxDockerConfig {
            read_only_root: false,
            tmpfs: vec![],
            pids_limit: Some(0),
            memory: Some(SizeLiteral::Str("  ".into())),
            memory_swap: None,
            cpus: Some(0.0),
            env: Default::default(),
            ..Default::default()
        };
        let args = build_sandbox_create_args(&CreateArgsSpec {
            name: "c",
            cfg: &cfg,
            scope_key: "dev",
            created_at_ms: Some(1),
            labels: None,
            config_hash: None,
        });
        assert!(!args.contains(&"--read-only".to_string()));
        assert!(!args.contains(&"--tmpfs".to_string()));
        assert!(!args.contains(&"--pids-limit".to_string()));
        assert!(!args.contains(&"--memory".to_string()));
        assert!(!args.contains(&"--cpus".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("wopr.configHash")));
    }

    #[test]
    fn test_create_args_optional_flags() {
        let cfg = SandboxDockerConfig {
            user: Some("1000:1000".into()),
            seccomp_profile: Some("/etc/wopr/seccomp.json".into()),
            apparmor_profile: Some("wopr-sandbox".into()),
            dns: Some(vec!["1.1.1.1".into(), "  ".into()]),
            extra_hosts: Some(vec!["db:10.0.0.2".into(), "".into()]),
            binds: Some(vec!["/h/a:/c/a".into(), "/h/b:/c/b".into()]),
            memory: Some(SizeLiteral::Num(serde_json::Number::from(1048576))),
            ..Default::default()
        };
        let args = build_sandbox_create_args(&CreateArgsSpec {
            name: "c",
            cfg: &cfg,
            scope_key: "dev",
            created_at_ms: Some(1),
            labels: None,
            config_hash: None,
        });
        assert!(has_pair(&args, "--user", "1000:1000"));
        assert!(has_pair(&args, "--security-opt", "seccomp=/etc/wopr/seccomp.json"));
        assert!(has_pair(&args, "--security-opt", "apparmor=wopr-sandbox"));
        assert!(has_pair(&args, "--dns", "1.1.1.1"));
        assert_eq!(args.iter().filter(|a| *a == "--dns").count(), 1);
        assert!(has_pair(&args, "--add-host", "db:10.0.0.2"));
        assert_eq!(args.iter().filter(|a| *a == "--add-host").count(), 1);
        assert!(has_pair(&args, "-v", "/h/a:/c/a"));
        assert!(has_pair(&args, "-v", "/h/b:/c/b"));
        assert!(has_pair(&args, "--memory", "1048576"));
    }

    #[test]
    fn test_create_args_custom_labels_skip_empty() {
        let cfg = SandboxDockerConfig::default();
        let labels = BTreeMap::from([
            ("team".to_string(), "infra".to_string()),
            ("empty".to_string(), String::new()),
            (String::new(), "value".to_string()),
        ]);
        let args = build_sandbox_create_args(&CreateArgsSpec {
            name: "c",
            cfg: &cfg,
            scope_key: "dev",
            created_at_ms: Some(1),
            labels: Some(&labels),
            config_hash: None,
        });
        assert!(has_pair(&args, "--label", "team=infra"));
        assert!(!args.iter().any(|a| a == "empty=" || a == "=value"));
    }

    #[test]
    fn test_format_ulimit_grammar() {
        assert_eq!(
            format_ulimit("nofile", &UlimitValue::Num(1024)).as_deref(),
            Some("nofile=1024")
        );
        assert_eq!(
            format_ulimit("nofile", &UlimitValue::Str("unlimited".into())).as_deref(),
            Some("nofile=unlimited")
        );
        assert_eq!(
            format_ulimit(
                "nofile",
                &UlimitValue::Pair(UlimitPair {
                    soft: None,
                    hard: Some(2048)
                })
            )
            .as_deref(),
            Some("nofile=2048")
        );
        assert_eq!(
            format_ulimit(
                "nofile",
                &UlimitValue::Pair(UlimitPair {
                    soft: Some(-5),
                    hard: Some(2048)
                })
            )
            .as_deref(),
            Some("nofile=0:2048")
        );
        assert_eq!(
            format_ulimit(
                "nofile",
                &UlimitValue::Pair(UlimitPair {
                    soft: None,
                    hard: None
                })
            ),
            None
        );
        assert_eq!(format_ulimit("  ", &UlimitValue::Num(1)), None);
        assert_eq!(format_ulimit("n", &UlimitValue::Str("  ".into())), None);
    }

    #[test]
    fn test_create_invocation_workspace_mount() {
        let cfg = SandboxDockerConfig::default();
        let base = CreateContainerSpec {
            name: "c",
            cfg: &cfg,
            scope_key: "dev",
            workspace_dir: Path::new("/srv/ws/dev"),
            workspace_access: WorkspaceAccess::Ro,
            config_hash: None,
            created_at_ms: Some(1),
        };
        let args = build_create_invocation(&base);
        assert!(has_pair(&args, "-v", "/srv/ws/dev:/workspace:ro"));
        assert!(has_pair(&args, "--workdir", "/workspace"));
        assert_eq!(
            &args[args.len() - 3..],
            &["wopr-sandbox:latest", "sleep", "infinity"]
        );

        let rw = CreateContainerSpec {
            workspace_access: WorkspaceAccess::Rw,
            ..base.clone()
        };
        assert!(has_pair(&build_create_invocation(&rw), "-v", "/srv/ws/dev:/workspace"));

        let none = CreateContainerSpec {
            workspace_access: WorkspaceAccess::None,
            ..base
        };
        assert!(!build_create_invocation(&none)
            .iter()
            .any(|a| a.starts_with("/srv/ws/dev:")));
    }

    #[test]
    fn test_create_invocation_carries_configured_labels() {
        let cfg = SandboxDockerConfig {
            labels: BTreeMap::from([
                ("team".to_string(), "infra".to_string()),
                ("blank".to_string(), String::new()),
            ]),
            ..Default::default()
        };
        let args = build_create_invocation(&CreateContainerSpec {
            name: "c",
            cfg: &cfg,
            scope_key: "dev",
            workspace_dir: Path::new("/srv/ws/dev"),
            workspace_access: WorkspaceAccess::Rw,
            config_hash: Some("h"),
            created_at_ms: Some(1),
        });
        assert!(has_pair(&args, "--label", "team=infra"));
        assert!(has_pair(&args, "--label", "wopr.configHash=h"));
        assert!(!args.iter().any(|a| a == "blank="));
    }

    #[test]
    fn test_exec_args_shape() {
        let opts = ExecOptions {
            workdir: Some("/workspace".into()),
            env: BTreeMap::from([("FOO".to_string(), "bar".to_string())]),
            timeout_secs: None,
        };
        let tail = argv(&["sh", "-c", "--", "echo hi"]);
        let args = build_exec_args("ctr", &opts, &tail);
        assert_eq!(
            args,
            argv(&[
                "exec", "-i", "-w", "/workspace", "-e", "FOO=bar", "ctr", "sh", "-c", "--",
                "echo hi"
            ])
        );
    }

    #[tokio::test]
    async fn test_exec_in_container_rejects_metacharacters() {
        let err = exec_in_container("ctr", "ls | wc -l", &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_exec_raw_rejects_empty_argv_and_bad_env_keys() {
        let err = exec_in_container_raw("ctr", &[], &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));

        let opts = ExecOptions {
            env: BTreeMap::from([("BAD-KEY".to_string(), "v".to_string())]),
            ..Default::default()
        };
        let err = exec_in_container_raw("ctr", &argv(&["true"]), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
    }

    #[test]
    fn test_validate_image_ref() {
        assert!(validate_image_ref("debian:bookworm-slim").is_ok());
        assert!(validate_image_ref("registry.example.com/team/img@sha256:abc").is_ok());
        assert!(validate_image_ref("").is_err());
        assert!(validate_image_ref("img; rm -rf /").is_err());
        assert!(validate_image_ref("img`id`").is_err());
    }

    #[test]
    fn test_truncate_output() {
        let short = truncate_output("ok".to_string());
        assert_eq!(short, "ok");
        let long = truncate_output("x".repeat(60_000));
        assert!(long.len() < 60_000);
        assert!(long.contains("[truncated, 60000 total bytes]"));
    }
}
