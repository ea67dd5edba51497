//! Progress reporting and per-session run registry.
//!
//! The tracker is a single-writer, append-only step log: only the
//! orchestrator writes, step statuses only move forward, and readers take
//! snapshots — which makes eventually-consistent polling safe without any
//! locking beyond the registry map itself. The read path never waits on
//! the build subprocess or the fix service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::config::ValidationConfig;
use crate::domain::error::{MendError, Result};
use crate::domain::report::ValidationReport;
use crate::fixer::FixProvider;
use crate::validator::BuildValidator;

/// Status of one coarse progress step. Transitions only move rightward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// A named step with its current status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
}

/// Snapshot of a run's coarse progress, for polling callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressView {
    /// The step most recently touched by the orchestrator.
    pub current_step: Option<String>,

    /// All steps in the order they were first reported.
    pub steps: Vec<StepRecord>,
}

/// Single-writer progress log shared between the orchestrator and pollers.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: Mutex<ProgressView>,
}

impl ProgressTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step transition. A step already past the given status is
    /// left untouched — statuses never move backward and steps are never
    /// removed.
    pub async fn update(&self, name: &str, status: StepStatus) {
        let mut inner = self.inner.lock().await;
        inner.current_step = Some(name.to_string());
        match inner.steps.iter_mut().rev().find(|r| r.name == name) {
            Some(record) => {
                if status > record.status {
                    record.status = status;
                }
            }
            None => inner.steps.push(StepRecord {
                name: name.to_string(),
                status,
            }),
        }
    }

    /// Take a snapshot for a polling caller.
    pub async fn view(&self) -> ProgressView {
        self.inner.lock().await.clone()
    }
}

// ---------------------------------------------------------------------------
// Session registry
// ---------------------------------------------------------------------------

/// Lifecycle status of a registered validation session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Validation run is executing.
    InProgress,
    /// Run terminated with a passing build.
    Completed,
    /// Run terminated with a failing build (unfixable or exhausted).
    Failed,
    /// Run aborted on a pre-loop fatal error.
    Error,
}

/// Point-in-time view of a session for polling callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub progress: ProgressView,
    /// Present once the run reached a terminal state via the normal path.
    pub report: Option<ValidationReport>,
    /// Present when the run aborted on a fatal error.
    pub error: Option<String>,
}

struct SessionEntry {
    status: SessionStatus,
    tracker: Arc<ProgressTracker>,
    cancel: Arc<AtomicBool>,
    report: Option<ValidationReport>,
    error: Option<String>,
}

/// Owns every active and archived validation session.
///
/// One active run per session id: a second `start` while one is in flight
/// is rejected, never queued, so two runs can never mutate the same
/// working copy.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a validation run for `session_id`, spawned onto the runtime.
    /// Returns once the run is registered; callers poll for progress.
    pub async fn start(
        &self,
        session_id: &str,
        config: ValidationConfig,
        provider: Arc<dyn FixProvider>,
    ) -> Result<()> {
        let validator = BuildValidator::new(config, provider)?;
        let tracker = Arc::new(ProgressTracker::new());
        let cancel = validator.cancel_flag();

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(session_id) {
                if existing.status == SessionStatus::InProgress {
                    return Err(MendError::SessionActive(session_id.to_string()));
                }
            }
            sessions.insert(
                session_id.to_string(),
                SessionEntry {
                    status: SessionStatus::InProgress,
                    tracker: tracker.clone(),
                    cancel,
                    report: None,
                    error: None,
                },
            );
        }

        let validator = validator.with_progress(tracker);
        let sessions = self.sessions.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            let outcome = validator.validate().await;
            let mut sessions = sessions.lock().await;
            let Some(entry) = sessions.get_mut(&id) else {
                warn!(session = %id, "session vanished before run completion");
                return;
            };
            match outcome {
                Ok(report) => {
                    entry.status = if report.success {
                        SessionStatus::Completed
                    } else {
                        SessionStatus::Failed
                    };
                    info!(session = %id, success = report.success, "validation run finished");
                    entry.report = Some(report);
                }
                Err(e) => {
                    warn!(session = %id, error = %e, "validation run aborted");
                    entry.status = SessionStatus::Error;
                    entry.error = Some(e.to_string());
                }
            }
        });

        Ok(())
    }

    /// Start a validation run under a freshly generated session id.
    pub async fn start_new(
        &self,
        config: ValidationConfig,
        provider: Arc<dyn FixProvider>,
    ) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.start(&session_id, config, provider).await?;
        Ok(session_id)
    }

    /// Coarse progress for a session.
    pub async fn progress(&self, session_id: &str) -> Result<ProgressView> {
        let tracker = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(session_id)
                .ok_or_else(|| MendError::SessionNotFound(session_id.to_string()))?
                .tracker
                .clone()
        };
        Ok(tracker.view().await)
    }

    /// Terminal report for a session; `None` while the run is in flight.
    pub async fn result(&self, session_id: &str) -> Result<Option<ValidationReport>> {
        let sessions = self.sessions.lock().await;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| MendError::SessionNotFound(session_id.to_string()))?;
        Ok(entry.report.clone())
    }

    /// Full point-in-time view: status, progress, report/error.
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        let (status, tracker, report, error) = {
            let sessions = self.sessions.lock().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| MendError::SessionNotFound(session_id.to_string()))?;
            (
                entry.status,
                entry.tracker.clone(),
                entry.report.clone(),
                entry.error.clone(),
            )
        };
        Ok(SessionSnapshot {
            status,
            progress: tracker.view().await,
            report,
            error,
        })
    }

    /// Request cancellation; honored at the next between-attempts boundary.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let sessions = self.sessions.lock().await;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| MendError::SessionNotFound(session_id.to_string()))?;
        entry.cancel.store(true, Ordering::SeqCst);
        info!(session = %session_id, "cancellation requested");
        Ok(())
    }
}
