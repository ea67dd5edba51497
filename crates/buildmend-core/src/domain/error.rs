//! Domain-level error taxonomy for Buildmend.
//!
//! Pre-loop fatal conditions (`CliNotFound`, `BuildTimeout`, configuration
//! problems) surface as `Err` to the caller. Build failures themselves are
//! data — they travel through the fix-and-retry loop inside the report and
//! never cross this boundary as errors.

use std::path::PathBuf;

/// Buildmend domain errors.
#[derive(Debug, thiserror::Error)]
pub enum MendError {
    #[error("build tool not found: {0}")]
    CliNotFound(String),

    #[error("build timed out after {timeout_secs}s")]
    BuildTimeout {
        timeout_secs: u64,
        /// Output captured before the process was killed.
        partial_output: String,
    },

    #[error("invalid validation config: {0}")]
    InvalidConfig(String),

    #[error("project directory not found: {0}")]
    ProjectDirMissing(PathBuf),

    #[error("fix service error: {0}")]
    FixService(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("session already running: {0}")]
    SessionActive(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Buildmend domain operations.
pub type Result<T> = std::result::Result<T, MendError>;
