//! State directory resolution.

use std::path::PathBuf;

/// Base state directory: `$WOPR_HOME` when set, else `~/.wopr`.
pub fn wopr_home() -> PathBuf {
    if let Ok(home) = std::env::var("WOPR_HOME") {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".wopr")
}

/// Directory holding sandbox plugin state.
pub fn sandbox_state_dir() -> PathBuf {
    wopr_home().join("sandbox")
}

/// Location of the legacy JSON registry, imported once at init.
pub fn legacy_registry_path() -> PathBuf {
    sandbox_state_dir().join("containers.json")
}

/// Default root under which per-session workspace directories are created.
pub fn default_workspace_root() -> PathBuf {
    wopr_home().join("sandboxes")
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: WOPR_HOME is process-global and tests run in parallel.
    #[test]
    fn test_wopr_home_resolution() {
        std::env::set_var("WOPR_HOME", "/srv/wopr-state");
        assert_eq!(wopr_home(), PathBuf::from("/srv/wopr-state"));
        assert_eq!(
            legacy_registry_path(),
            PathBuf::from("/srv/wopr-state/sandbox/containers.json")
        );
        assert_eq!(
            default_workspace_root(),
            PathBuf::from("/srv/wopr-state/sandboxes")
        );

        // Blank override falls through to the home-dir default
        std::env::set_var("WOPR_HOME", "  ");
        let home = wopr_home();
        std::env::remove_var("WOPR_HOME");
        assert!(home.ends_with(".wopr"));
    }
}
