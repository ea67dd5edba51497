//! Per-round attempt records for the validation loop.

use serde::{Deserialize, Serialize};

use crate::domain::diagnostic::BuildError;
use crate::domain::fix::FilePatch;

/// Terminal status of a single build attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Attempt is still executing.
    Running,
    /// Build passed on this attempt.
    Success,
    /// Build failed but fixes were generated and applied.
    Fixed,
    /// Build failed and the run terminated on this attempt.
    Failed,
}

/// Record of one build → parse → (fix → apply) round.
///
/// Created at the start of a round; immutable once a terminal status is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attempt {
    /// 1-based attempt number, strictly increasing with no gaps.
    pub attempt_number: u32,

    /// Attempt outcome.
    pub status: AttemptStatus,

    /// Failures parsed from this attempt's build output.
    pub errors: Vec<BuildError>,

    /// Fixes applied after this attempt (empty for success/failed attempts).
    pub fixes: Vec<FilePatch>,

    /// Full command transcript for this attempt.
    pub raw_log: String,
}

impl Attempt {
    /// Start a new attempt record.
    pub fn new(attempt_number: u32) -> Self {
        Self {
            attempt_number,
            status: AttemptStatus::Running,
            errors: Vec::new(),
            fixes: Vec::new(),
            raw_log: String::new(),
        }
    }

    /// Render the command transcript the way the attempt log stores it.
    pub fn render_log(
        command: &str,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
        elapsed_secs: f64,
    ) -> String {
        let mut parts = vec![format!("$ {}", command), format!("Exit code: {}", exit_code)];
        if !stdout.is_empty() {
            parts.push("--- stdout ---".to_string());
            parts.push(stdout.to_string());
        }
        if !stderr.is_empty() {
            parts.push("--- stderr ---".to_string());
            parts.push(stderr.to_string());
        }
        parts.push(format!("\nElapsed: {:.2}s", elapsed_secs));
        parts.join("\n")
    }
}
