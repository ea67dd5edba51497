//! Domain model for Buildmend validation runs.

pub mod attempt;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod fix;
pub mod report;

pub use attempt::{Attempt, AttemptStatus};
pub use config::{
    RemoteConfig, ValidationConfig, DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_SETUP_TIMEOUT_SECS,
};
pub use diagnostic::{BuildError, ErrorCategory};
pub use error::{MendError, Result};
pub use fix::FilePatch;
pub use report::{CliInfo, CliMode, ValidationReport};
