//! WOPR sandbox plugin: Docker-based session isolation for the agent host.
//!
//! Untrusted or semi-trusted agent sessions are confined to long-lived
//! containers with dropped capabilities, a controlled workspace mount, and a
//! tool-invocation policy. This crate provides:
//! - **Lifecycle engine**: deterministic naming, config-hash drift detection,
//!   (re)creation, start, setup-command execution, removal.
//! - **Persistent registry**: per-container records surviving restarts,
//!   backed by the host's repository.
//! - **Tool policy engine**: compiled allow/deny globs with deny-wins.
//! - **Pruning**: debounced idle/age reclamation and shutdown teardown.
//! - **Execution surface**: guarded shell and raw exec inside a container.

pub mod config_hash;
pub mod context;
pub mod docker;
pub mod home;
pub mod lifecycle;
pub mod migrate;
pub mod naming;
pub mod plugin;
pub mod policy;
pub mod prune;
pub mod registry;
pub mod resolve;
pub mod runtime;
pub mod shell;
pub mod storage;

pub use config_hash::compute_sandbox_config_hash;
pub use context::{get_sandbox_workspace_info, prune_all_sandboxes, resolve_sandbox_context};
pub use docker::{exec_docker, exec_in_container, exec_in_container_raw, ExecOptions, ExecResult};
pub use lifecycle::ensure_sandbox_container;
pub use plugin::{HostContext, SandboxPlugin};
pub use policy::{filter_tools_by_policy, is_tool_allowed};
pub use prune::ensure_container_running;
pub use resolve::{resolve_sandbox_config, should_sandbox};
pub use shell::{shell_escape_arg, validate_command, validate_env_key};
