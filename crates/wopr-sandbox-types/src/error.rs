//! Shared error types for the sandbox plugin.

use thiserror::Error;

/// Top-level error type for the sandbox plugin.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Invalid user input (shell command, env key, argv, image reference).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The Docker CLI exited non-zero or could not be spawned.
    #[error("Docker error: {0}")]
    Docker(String),

    /// A required image is missing and cannot be provisioned automatically.
    #[error("Image not available: {0}")]
    ImageNotAvailable(String),

    /// A storage/repository operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An insert hit an existing primary key.
    #[error("Record already exists: {0}")]
    Conflict(String),

    /// Legacy registry migration failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with SandboxError.
pub type SandboxResult<T> = Result<T, SandboxError>;
