//! Retry orchestrator: the build → parse → fix → apply → rebuild loop.
//!
//! State machine:
//! `INITIAL → RUNNING(n) → {SUCCESS | FIX_GENERATION → APPLY_FIXES →
//! RUNNING(n+1) | FAILED}`.
//!
//! Pre-loop fatal conditions (missing CLI, build timeout, bad config)
//! surface as `Err`; every other path terminates with a complete
//! [`ValidationReport`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::applier::PatchApplier;
use crate::domain::attempt::{Attempt, AttemptStatus};
use crate::domain::config::ValidationConfig;
use crate::domain::diagnostic::BuildError;
use crate::domain::error::{MendError, Result};
use crate::domain::report::{CliInfo, ValidationReport};
use crate::fixer::{FixEngine, FixProvider};
use crate::git;
use crate::parser::BuildOutputParser;
use crate::probe;
use crate::progress::{ProgressTracker, StepStatus};
use crate::publisher::{PublishOutcome, Publisher};
use crate::runner::BuildRunner;

/// Drives one full validation run over a working copy.
pub struct BuildValidator {
    config: ValidationConfig,
    runner: BuildRunner,
    parser: BuildOutputParser,
    engine: FixEngine,
    applier: PatchApplier,
    tracker: Option<Arc<ProgressTracker>>,
    cancel: Arc<AtomicBool>,
}

impl BuildValidator {
    /// Create a validator. Rejects structurally invalid configuration.
    pub fn new(config: ValidationConfig, provider: Arc<dyn FixProvider>) -> Result<Self> {
        config.validate()?;
        let runner = BuildRunner::new(&config.project_dir).with_env(config.build_env.clone());
        let engine = FixEngine::new(provider, &config.project_dir);
        let applier = PatchApplier::new(&config.project_dir);
        Ok(Self {
            config,
            runner,
            parser: BuildOutputParser::new(),
            engine,
            applier,
            tracker: None,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Attach a progress tracker for polling callers.
    pub fn with_progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Flag that cancels the run at the next between-attempts boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    async fn step(&self, name: &str, status: StepStatus) {
        if let Some(tracker) = &self.tracker {
            tracker.update(name, status).await;
        }
    }

    /// Run the full validation loop to a terminal state.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        // INITIAL: configuration, working copy, CLI capability.
        self.config.validate()?;
        if !self.config.project_dir.is_dir() {
            return Err(MendError::ProjectDirMissing(self.config.project_dir.clone()));
        }

        self.step("Probing build CLI", StepStatus::Running).await;
        let cli_info = probe::probe_cli(
            self.config.cli_program(),
            self.config.probe_timeout_secs,
        )
        .await;
        if !cli_info.available {
            self.step("Probing build CLI", StepStatus::Error).await;
            return Err(MendError::CliNotFound(self.config.cli_program().to_string()));
        }
        self.step("Probing build CLI", StepStatus::Completed).await;

        let mut warnings = Vec::new();
        if cli_info.is_degraded() {
            let warning = format!(
                "build CLI variant '{}' cannot authenticate against the remote execution backend; proceeding in degraded mode",
                cli_info.version.as_deref().unwrap_or("unknown")
            );
            warn!(%warning);
            warnings.push(warning);
        }

        git::ensure_gitignore(&self.config.project_dir)?;
        self.run_setup_commands(&mut warnings).await;

        // Build loop.
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut files_modified: BTreeSet<String> = BTreeSet::new();
        let mut applied_fix_count = 0usize;
        let max_attempts = self.config.max_attempts;
        let mut n = 0u32;

        loop {
            n += 1;

            // Cancellation is honored only here, before the subprocess
            // is spawned.
            if self.cancel.load(Ordering::SeqCst) {
                self.step("Validation cancelled", StepStatus::Error).await;
                return Ok(self.finish(
                    false,
                    format!("Validation cancelled before attempt {n}."),
                    attempts,
                    Vec::new(),
                    files_modified,
                    false,
                    cli_info,
                    warnings,
                    started_at,
                    start,
                ));
            }

            let mut attempt = Attempt::new(n);
            let step_name = format!("Running build (attempt {n}/{max_attempts})");
            self.step(&step_name, StepStatus::Running).await;

            // RUNNING(n)
            let outcome = match self
                .runner
                .run(&self.config.build_command, self.config.build_timeout_secs)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.step(&step_name, StepStatus::Error).await;
                    return Err(e);
                }
            };
            attempt.raw_log = Attempt::render_log(
                &outcome.command,
                outcome.exit_code,
                &outcome.stdout,
                &outcome.stderr,
                outcome.duration_ms as f64 / 1000.0,
            );
            let combined = outcome.combined();

            // Exit code 0 with hard error indicators is still a failure.
            let mut build_passed = outcome.succeeded();
            if build_passed && self.parser.has_error_indicators(&combined) {
                warn!(attempt = n, "exit code 0 but error indicators present, treating as failure");
                build_passed = false;
            }

            let mut errors = self.parser.parse(&combined);

            if build_passed && errors.is_empty() {
                // SUCCESS (terminal)
                attempt.status = AttemptStatus::Success;
                attempts.push(attempt);
                self.step(&step_name, StepStatus::Completed).await;
                info!(attempt = n, "build succeeded");

                let pushed = self
                    .run_publisher_gate(&files_modified, n, applied_fix_count, &mut warnings)
                    .await;
                let message = if pushed {
                    format!("Build passed on attempt {n}. Fixes pushed to GitHub.")
                } else {
                    format!("Build passed on attempt {n}.")
                };
                return Ok(self.finish(
                    true,
                    message,
                    attempts,
                    Vec::new(),
                    files_modified,
                    pushed,
                    cli_info,
                    warnings,
                    started_at,
                    start,
                ));
            }

            // Failed attempts always carry at least one error.
            if errors.is_empty() {
                errors.push(self.parser.fallback_error(&combined));
            }
            attempt.errors = errors.clone();
            let summary = BuildOutputParser::error_summary(&errors);
            info!(attempt = n, errors = errors.len(), ?summary, "build attempt failed");
            self.step(&step_name, StepStatus::Error).await;

            if n >= max_attempts {
                // FAILED (terminal): attempt budget exhausted.
                attempt.status = AttemptStatus::Failed;
                attempts.push(attempt);
                self.step("Attempt budget exhausted", StepStatus::Error).await;
                let message = format!(
                    "Build failed after {n} attempt(s) with {} error(s) remaining.",
                    errors.len()
                );
                return Ok(self.finish(
                    false,
                    message,
                    attempts,
                    errors,
                    files_modified,
                    false,
                    cli_info,
                    warnings,
                    started_at,
                    start,
                ));
            }

            // FIX_GENERATION
            let fix_step = format!("Generating fixes for {} error(s)", errors.len());
            self.step(&fix_step, StepStatus::Running).await;
            let patches = match self.engine.generate(&errors).await {
                Ok(patches) => patches,
                Err(e) => {
                    warn!(error = %e, "fix generation failed");
                    warnings.push(format!("fix service error: {e}"));
                    Vec::new()
                }
            };

            if patches.is_empty() {
                // FAILED (terminal): unfixable, distinct from exhaustion.
                attempt.status = AttemptStatus::Failed;
                attempts.push(attempt);
                self.step(&fix_step, StepStatus::Error).await;
                let message = format!(
                    "Repair service produced no usable fixes for {} error(s); stopping at attempt {n}.",
                    errors.len()
                );
                return Ok(self.finish(
                    false,
                    message,
                    attempts,
                    errors,
                    files_modified,
                    false,
                    cli_info,
                    warnings,
                    started_at,
                    start,
                ));
            }
            self.step(&fix_step, StepStatus::Completed).await;

            // APPLY_FIXES → RUNNING(n+1)
            let apply_step = format!("Applying {} fix(es)", patches.len());
            self.step(&apply_step, StepStatus::Running).await;
            let written = self.applier.apply(&patches)?;
            applied_fix_count += written.len();
            files_modified.extend(written);
            attempt.status = AttemptStatus::Fixed;
            attempt.fixes = patches;
            attempts.push(attempt);
            self.step(&apply_step, StepStatus::Completed).await;
        }
    }

    /// Run optional setup commands before the first attempt. Problems are
    /// warnings only — the build loop surfaces anything real.
    async fn run_setup_commands(&self, warnings: &mut Vec<String>) {
        for command in &self.config.setup_commands {
            let display = command.join(" ");
            let step_name = format!("Running setup: {display}");
            self.step(&step_name, StepStatus::Running).await;

            match self
                .runner
                .run(command, self.config.setup_timeout_secs)
                .await
            {
                Ok(outcome)
                    if outcome.succeeded()
                        && !self.parser.has_error_indicators(&outcome.combined()) =>
                {
                    self.step(&step_name, StepStatus::Completed).await;
                }
                Ok(outcome) => {
                    let errors = self.parser.parse(&outcome.combined());
                    let warning = format!(
                        "setup command '{display}' reported {} problem(s)",
                        errors.len().max(1)
                    );
                    warn!(%warning);
                    warnings.push(warning);
                    self.step(&step_name, StepStatus::Error).await;
                }
                Err(e) => {
                    let warning = format!("setup command '{display}' failed: {e}");
                    warn!(%warning);
                    warnings.push(warning);
                    self.step(&step_name, StepStatus::Error).await;
                }
            }
        }
    }

    /// Publisher gate: runs only after SUCCESS with modified files and a
    /// configured remote. Failures downgrade to warnings.
    async fn run_publisher_gate(
        &self,
        files_modified: &BTreeSet<String>,
        total_attempts: u32,
        fix_count: usize,
        warnings: &mut Vec<String>,
    ) -> bool {
        if files_modified.is_empty() {
            return false;
        }
        let Some(remote) = &self.config.remote else {
            warnings.push(
                "fixes were applied but no remote is configured; skipping push".to_string(),
            );
            return false;
        };

        self.step("Pushing fixes to remote", StepStatus::Running).await;
        let publisher = Publisher::new(&self.config.project_dir, remote.clone());
        let message = Publisher::commit_message(total_attempts, fix_count);
        match publisher.publish(&message) {
            PublishOutcome::Pushed { branch } => {
                info!(%branch, "fixes published");
                self.step("Pushing fixes to remote", StepStatus::Completed).await;
                true
            }
            PublishOutcome::NothingToCommit => {
                self.step("Pushing fixes to remote", StepStatus::Completed).await;
                false
            }
            PublishOutcome::Failed { warning } => {
                warnings.push(warning);
                self.step("Pushing fixes to remote", StepStatus::Error).await;
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        success: bool,
        message: String,
        attempts: Vec<Attempt>,
        final_errors: Vec<BuildError>,
        files_modified: BTreeSet<String>,
        pushed_to_github: bool,
        cli_info: CliInfo,
        warnings: Vec<String>,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> ValidationReport {
        let report = ValidationReport {
            success,
            message,
            total_attempts: attempts.len() as u32,
            elapsed_seconds: start.elapsed().as_secs_f64(),
            files_modified,
            pushed_to_github,
            attempts,
            final_errors,
            project_dir: self.config.project_dir.display().to_string(),
            cli_info,
            warnings,
            started_at,
            finished_at: Utc::now(),
        };
        debug_assert!(
            report.check_invariants().is_ok(),
            "report invariants violated: {:?}",
            report.check_invariants()
        );
        report
    }
}
