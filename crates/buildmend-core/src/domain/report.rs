//! Final validation report and build-CLI capability info.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::attempt::Attempt;
use crate::domain::diagnostic::BuildError;

/// Which variant of the build CLI the probe identified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CliMode {
    /// Fully capable variant that can authenticate against the remote
    /// execution backend.
    CloudCli,
    /// Degraded local variant; builds run but cannot use the backend.
    Core,
    /// Probe answered but the variant could not be identified.
    Unknown,
    /// No executable found.
    NotFound,
}

/// Result of the build-CLI capability probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CliInfo {
    /// Whether the executable was found at all.
    pub available: bool,

    /// Resolved executable path.
    pub path: Option<String>,

    /// Extracted MAJOR.MINOR.PATCH version.
    pub version: Option<String>,

    /// Identified variant.
    pub mode: CliMode,

    /// Raw probe output for display.
    pub raw: String,
}

impl CliInfo {
    /// CliInfo for a missing executable.
    pub fn not_found() -> Self {
        Self {
            available: false,
            path: None,
            version: None,
            mode: CliMode::NotFound,
            raw: String::new(),
        }
    }

    /// Whether the variant is degraded (cannot authenticate against the
    /// remote execution backend).
    pub fn is_degraded(&self) -> bool {
        self.available && self.mode != CliMode::CloudCli
    }
}

/// Final result of a full validation run.
///
/// Assembled exactly once when the orchestrator reaches a terminal state;
/// read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    /// Whether the build ultimately passed.
    pub success: bool,

    /// Human-readable outcome summary.
    pub message: String,

    /// Number of attempts executed (attempt numbers are 1..=total_attempts).
    pub total_attempts: u32,

    /// Wall-clock duration of the run in seconds.
    pub elapsed_seconds: f64,

    /// Union of all file paths the patch applier physically changed.
    pub files_modified: BTreeSet<String>,

    /// Whether applied fixes were pushed to the remote.
    pub pushed_to_github: bool,

    /// Per-round records in execution order.
    pub attempts: Vec<Attempt>,

    /// Errors from the final attempt when the run failed.
    pub final_errors: Vec<BuildError>,

    /// Working copy the run operated on.
    pub project_dir: String,

    /// Build-CLI probe result.
    pub cli_info: CliInfo,

    /// Non-fatal conditions surfaced to the caller (degraded CLI, push
    /// failure, setup warnings).
    pub warnings: Vec<String>,

    /// When the run entered its initial state.
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state.
    pub finished_at: DateTime<Utc>,
}

impl ValidationReport {
    /// Check the cross-field invariants the orchestrator must uphold.
    /// Used by tests; never called on a hot path.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (i, attempt) in self.attempts.iter().enumerate() {
            let expected = (i + 1) as u32;
            if attempt.attempt_number != expected {
                return Err(format!(
                    "attempt_number {} at index {}, expected {}",
                    attempt.attempt_number, i, expected
                ));
            }
        }
        if self.total_attempts as usize != self.attempts.len() {
            return Err(format!(
                "total_attempts {} but {} attempt records",
                self.total_attempts,
                self.attempts.len()
            ));
        }
        if self.pushed_to_github && (!self.success || self.files_modified.is_empty()) {
            return Err("pushed_to_github requires success and modified files".to_string());
        }
        if !self.final_errors.is_empty() && self.success {
            return Err("final_errors present on a successful run".to_string());
        }
        if self.finished_at < self.started_at {
            return Err("finished_at precedes started_at".to_string());
        }
        Ok(())
    }
}
