//! Shell-safety guards for in-container execution.
//!
//! Commands destined for `sh -c` must not smuggle shell control operators;
//! callers that need pipes, redirects, or substitution use the raw argv
//! entry point instead, which bypasses the shell entirely.

use wopr_sandbox_types::{SandboxError, SandboxResult};

/// Shell metacharacters rejected by [`validate_command`].
const COMMAND_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '<', '>', '\\'];

/// Quote a single argument for POSIX sh. Empty input becomes `''`.
pub fn shell_escape_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Validate a command string destined for `sh -c` inside a container.
///
/// Trims the input, then rejects null bytes, empty commands, and shell
/// metacharacters. Returns the trimmed command.
pub fn validate_command(command: &str) -> SandboxResult<String> {
    let trimmed = command.trim();
    if trimmed.contains('\0') {
        return Err(SandboxError::InvalidInput(
            "command contains a null byte".to_string(),
        ));
    }
    if trimmed.is_empty() {
        return Err(SandboxError::InvalidInput("command is empty".to_string()));
    }
    if let Some(c) = trimmed
        .chars()
        .find(|c| COMMAND_METACHARACTERS.contains(c))
    {
        return Err(SandboxError::InvalidInput(format!(
            "command contains shell metacharacter '{c}'; use execInContainerRaw for shell features"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate an environment variable name as a POSIX identifier:
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_env_key(key: &str) -> SandboxResult<()> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SandboxError::InvalidInput(format!(
            "invalid environment variable name: {key:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_arg() {
        assert_eq!(shell_escape_arg("it's"), "'it'\\''s'");
        assert_eq!(shell_escape_arg(""), "''");
        assert_eq!(shell_escape_arg("plain"), "'plain'");
        assert_eq!(shell_escape_arg("a b"), "'a b'");
    }

    #[test]
    fn test_validate_command_trims() {
        assert_eq!(validate_command("  echo hi  ").unwrap(), "echo hi");
    }

    #[test]
    fn test_validate_command_rejects_metacharacters() {
        let err = validate_command("ls | grep foo").unwrap_err();
        assert!(err.to_string().contains('|'), "got: {err}");
        for cmd in [
            "true; rm -rf /",
            "sleep 1 & echo bg",
            "echo `id`",
            "echo $HOME",
            "cat < /etc/passwd",
            "echo x > /tmp/f",
            "echo a\\nb",
        ] {
            assert!(validate_command(cmd).is_err(), "accepted: {cmd}");
        }
    }

    #[test]
    fn test_validate_command_rejects_null_byte() {
        let err = validate_command("ls\0rm").unwrap_err();
        assert!(err.to_string().contains("null byte"), "got: {err}");
    }

    #[test]
    fn test_validate_command_rejects_empty() {
        assert!(validate_command("").is_err());
        assert!(validate_command("   ").is_err());
    }

    #[test]
    fn test_validate_env_key() {
        assert!(validate_env_key("PATH").is_ok());
        assert!(validate_env_key("_x9").is_ok());
        assert!(validate_env_key("LC_ALL").is_ok());
        assert!(validate_env_key("").is_err());
        assert!(validate_env_key("9PATH").is_err());
        assert!(validate_env_key("MY-VAR").is_err());
        assert!(validate_env_key("A B").is_err());
    }
}
