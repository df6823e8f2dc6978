//! Deterministic naming: session-key slugs, scope keys, workspace paths.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use wopr_sandbox_types::SandboxScope;

/// Scope key used by every session when the sandbox scope is `shared`.
pub const SHARED_SCOPE_KEY: &str = "shared";

/// Scope key for a blank session name in `session` scope.
pub const MAIN_SCOPE_KEY: &str = "main";

const SLUG_MAX_LEN: usize = 32;
const SLUG_FALLBACK: &str = "session";

/// Slugify a session key into a container-name-safe identifier.
///
/// Deterministic per input: `<slug>-<hash8>` where the slug is the lowercased
/// key with runs of characters outside `[a-z0-9._-]` collapsed to a single
/// `-`, boundary dashes stripped, capped at 32 chars (falling back to
/// `"session"` when nothing survives), and `hash8` is the first 8 hex chars
/// of SHA-256 over the trimmed key. At most 41 characters.
pub fn slugify_session_key(session_key: &str) -> String {
    let trimmed = session_key.trim();
    let base = if trimmed.is_empty() {
        SLUG_FALLBACK
    } else {
        trimmed
    };

    let lowered = base.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut in_run = false;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
            slug.push(c);
            in_run = false;
        } else if !in_run {
            slug.push('-');
            in_run = true;
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(SLUG_MAX_LEN).collect();
    let slug = if slug.is_empty() {
        SLUG_FALLBACK.to_string()
    } else {
        slug
    };

    // The digest covers the trimmed input as-is, not the fallback slug body
    let mut hasher = Sha256::new();
    hasher.update(trimmed.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{slug}-{}", &digest[..8])
}

/// Scope key for a session: `"shared"` in shared scope, else the trimmed
/// session key (or `"main"` when blank).
pub fn resolve_sandbox_scope_key(scope: SandboxScope, session_key: &str) -> String {
    match scope {
        SandboxScope::Shared => SHARED_SCOPE_KEY.to_string(),
        SandboxScope::Session => {
            let trimmed = session_key.trim();
            if trimmed.is_empty() {
                MAIN_SCOPE_KEY.to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}

/// Host workspace directory for a session under `root`.
pub fn resolve_sandbox_workspace_dir(root: &Path, session_key: &str) -> PathBuf {
    root.join(slugify_session_key(session_key))
}
