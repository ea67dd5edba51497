//! Buildmend Core Library
//!
//! Automated validation of generated data-transformation projects: run the
//! build tool, classify its failures, request repairs from an external fix
//! service, apply them, retry up to a bounded budget, and publish applied
//! fixes to the version-control remote on success.

pub mod applier;
pub mod domain;
pub mod fixer;
pub mod git;
pub mod parser;
pub mod probe;
pub mod progress;
pub mod publisher;
pub mod runner;
pub mod telemetry;
pub mod validator;

pub use domain::{
    Attempt, AttemptStatus, BuildError, CliInfo, CliMode, ErrorCategory, FilePatch, MendError,
    RemoteConfig, Result, ValidationConfig, ValidationReport,
};

pub use applier::PatchApplier;
pub use fixer::{FixEngine, FixProvider, FixRequest, FixResponse, HttpFixService};
pub use git::{detect_branch, ensure_gitignore, is_git_repo};
pub use parser::{extract_context, BuildOutputParser};
pub use probe::probe_cli;
pub use progress::{
    ProgressTracker, ProgressView, SessionRegistry, SessionSnapshot, SessionStatus, StepRecord,
    StepStatus,
};
pub use publisher::{PublishOutcome, Publisher};
pub use runner::{BuildRunner, CommandOutcome};
pub use telemetry::init_tracing;
pub use validator::BuildValidator;

/// Buildmend version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
