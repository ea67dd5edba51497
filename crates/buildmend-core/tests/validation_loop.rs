//! End-to-end tests for the build → parse → fix → rebuild loop.
//!
//! The build tool is a shell script inside the working copy that fails
//! until the fix provider rewrites the model file; the fix service is a
//! deterministic stub injected through the `FixProvider` seam.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use buildmend_core::{
    AttemptStatus, BuildError, BuildValidator, FilePatch, FixProvider, MendError, RemoteConfig,
    SessionRegistry, ValidationConfig,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Build script that fails with a compilation error until the model file
/// contains the word "fixed".
const CONDITIONAL_BUILD_SCRIPT: &str = r#"#!/bin/sh
if grep -q fixed models/fct_orders.sql; then
    echo "Completed successfully"
    exit 0
fi
echo "Compilation Error in model fct_orders (models/fct_orders.sql)"
echo "  unknown column \`amount\`"
echo ""
exit 1
"#;

const ALWAYS_PASS_SCRIPT: &str = "#!/bin/sh\necho \"Completed successfully\"\nexit 0\n";

/// Exit code 0 but output that carries hard error indicators.
const FALSE_POSITIVE_SCRIPT: &str = r#"#!/bin/sh
echo "Database Error in model fct_orders (models/fct_orders.sql)"
echo "  Object 'RAW.ORDERS' does not exist"
echo ""
exit 0
"#;

fn write_project(dir: &Path, build_script: &str) {
    std::fs::create_dir_all(dir.join("models")).unwrap();
    std::fs::write(dir.join("models/fct_orders.sql"), "select broken\n").unwrap();
    std::fs::write(dir.join("build.sh"), build_script).unwrap();
}

fn test_config(dir: &Path) -> ValidationConfig {
    ValidationConfig::new(
        dir.to_path_buf(),
        vec!["sh".to_string(), "build.sh".to_string()],
    )
    .unwrap()
}

struct FixingProvider;

#[async_trait]
impl FixProvider for FixingProvider {
    async fn propose(
        &self,
        _errors: &[BuildError],
        _files: &BTreeMap<String, String>,
    ) -> buildmend_core::Result<Vec<FilePatch>> {
        Ok(vec![FilePatch::new(
            "models/fct_orders.sql",
            "select order_id -- fixed\n",
            "Replace the broken column reference",
        )])
    }
}

struct EmptyProvider;

#[async_trait]
impl FixProvider for EmptyProvider {
    async fn propose(
        &self,
        _errors: &[BuildError],
        _files: &BTreeMap<String, String>,
    ) -> buildmend_core::Result<Vec<FilePatch>> {
        Ok(Vec::new())
    }
}

/// Proposes a patch that changes the file but never actually fixes it.
struct UselessProvider;

#[async_trait]
impl FixProvider for UselessProvider {
    async fn propose(
        &self,
        _errors: &[BuildError],
        _files: &BTreeMap<String, String>,
    ) -> buildmend_core::Result<Vec<FilePatch>> {
        Ok(vec![FilePatch::new(
            "models/fct_orders.sql",
            "select still_broken\n",
            "An unhelpful rewrite",
        )])
    }
}

/// Counts how often the service is called, then delegates to `EmptyProvider`.
struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl FixProvider for CountingProvider {
    async fn propose(
        &self,
        _errors: &[BuildError],
        _files: &BTreeMap<String, String>,
    ) -> buildmend_core::Result<Vec<FilePatch>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

fn run(dir: &Path, program: &str, args: &[&str]) {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{program} {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Bare remote plus a working clone seeded with the conditional project.
fn git_project(root: &Path) -> (PathBuf, PathBuf) {
    let bare = root.join("remote.git");
    std::fs::create_dir_all(&bare).unwrap();
    run(&bare, "git", &["init", "--bare", "-b", "main"]);

    let work = root.join("work");
    run(root, "git", &["clone", bare.to_str().unwrap(), "work"]);
    run(&work, "git", &["config", "user.name", "test"]);
    run(&work, "git", &["config", "user.email", "test@example.com"]);
    write_project(&work, CONDITIONAL_BUILD_SCRIPT);
    run(&work, "git", &["add", "-A"]);
    run(&work, "git", &["commit", "-m", "initial project"]);
    run(&work, "git", &["push", "origin", "main"]);
    (bare, work)
}

fn remote_commit_count(bare: &Path) -> usize {
    let output = Command::new("git")
        .args(["rev-list", "--count", "main"])
        .current_dir(bare)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_first_build_succeeds_with_nothing_to_publish() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), ALWAYS_PASS_SCRIPT);

    let validator = BuildValidator::new(test_config(dir.path()), Arc::new(EmptyProvider)).unwrap();
    let report = validator.validate().await.unwrap();

    assert!(report.success);
    assert_eq!(report.total_attempts, 1);
    assert!(report.files_modified.is_empty());
    assert!(!report.pushed_to_github);
    assert!(report.final_errors.is_empty());
    assert_eq!(report.attempts[0].status, AttemptStatus::Success);
    report.check_invariants().unwrap();
}

#[tokio::test]
async fn fixable_error_is_repaired_and_pushed() {
    let root = tempfile::tempdir().unwrap();
    let (bare, work) = git_project(root.path());
    let commits_before = remote_commit_count(&bare);

    let config = test_config(&work).with_remote(RemoteConfig {
        url: bare.display().to_string(),
        token: None,
        branch: None,
    });
    let validator = BuildValidator::new(config, Arc::new(FixingProvider)).unwrap();
    let report = validator.validate().await.unwrap();

    assert!(report.success, "unexpected failure: {}", report.message);
    assert_eq!(report.total_attempts, 2);
    assert!(report.files_modified.contains("models/fct_orders.sql"));
    assert!(report.pushed_to_github);
    assert_eq!(report.attempts[0].status, AttemptStatus::Fixed);
    assert_eq!(report.attempts[0].errors.len(), 1);
    assert_eq!(report.attempts[1].status, AttemptStatus::Success);
    assert_eq!(remote_commit_count(&bare), commits_before + 1);
    report.check_invariants().unwrap();
}

#[tokio::test]
async fn unfixable_error_terminates_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), CONDITIONAL_BUILD_SCRIPT);

    let config = test_config(dir.path()).with_max_attempts(3);
    let validator = BuildValidator::new(config, Arc::new(EmptyProvider)).unwrap();
    let report = validator.validate().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.total_attempts, 1);
    assert_eq!(report.attempts[0].status, AttemptStatus::Failed);
    assert_eq!(report.final_errors, report.attempts[0].errors);
    assert!(!report.final_errors.is_empty());
    assert!(report.message.contains("no usable fixes"));
    report.check_invariants().unwrap();
}

#[tokio::test]
async fn exhausted_budget_reports_all_attempts() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), CONDITIONAL_BUILD_SCRIPT);

    let config = test_config(dir.path()).with_max_attempts(3);
    let validator = BuildValidator::new(config, Arc::new(UselessProvider)).unwrap();
    let report = validator.validate().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.total_attempts, 3);
    assert!(!report.pushed_to_github);
    let numbers: Vec<u32> = report.attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(report.attempts[0].status, AttemptStatus::Fixed);
    assert_eq!(report.attempts[2].status, AttemptStatus::Failed);
    assert_eq!(report.final_errors, report.attempts[2].errors);
    assert!(report.message.contains("after 3 attempt(s)"));
    report.check_invariants().unwrap();
}

#[tokio::test]
async fn push_failure_is_a_warning_not_a_failure() {
    let root = tempfile::tempdir().unwrap();
    let (_bare, work) = git_project(root.path());

    let config = test_config(&work).with_remote(RemoteConfig {
        url: "/nonexistent/path/remote.git".to_string(),
        token: None,
        branch: None,
    });
    let validator = BuildValidator::new(config, Arc::new(FixingProvider)).unwrap();
    let report = validator.validate().await.unwrap();

    assert!(report.success);
    assert!(report.files_modified.contains("models/fct_orders.sql"));
    assert!(!report.pushed_to_github);
    assert!(
        report.warnings.iter().any(|w| w.contains("push failed")),
        "expected a push warning, got {:?}",
        report.warnings
    );
    report.check_invariants().unwrap();
}

#[tokio::test]
async fn zero_exit_with_error_indicators_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), FALSE_POSITIVE_SCRIPT);

    let validator = BuildValidator::new(test_config(dir.path()), Arc::new(EmptyProvider)).unwrap();
    let report = validator.validate().await.unwrap();

    assert!(!report.success);
    assert!(!report.final_errors.is_empty());
    report.check_invariants().unwrap();
}

#[tokio::test]
async fn fix_service_called_once_per_failed_attempt() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), CONDITIONAL_BUILD_SCRIPT);

    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    });
    let config = test_config(dir.path()).with_max_attempts(5);
    let validator = BuildValidator::new(config, provider.clone()).unwrap();
    let report = validator.validate().await.unwrap();

    // Zero fixes terminates the run, so exactly one request was made.
    assert!(!report.success);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn build_timeout_is_fatal_and_pre_loop() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), "#!/bin/sh\necho starting\nsleep 30\n");

    let config = test_config(dir.path()).with_build_timeout(1);
    let validator = BuildValidator::new(config, Arc::new(EmptyProvider)).unwrap();
    let result = validator.validate().await;

    match result {
        Err(MendError::BuildTimeout { partial_output, .. }) => {
            assert!(partial_output.contains("starting"));
        }
        other => panic!("expected BuildTimeout, got {:?}", other.map(|r| r.message)),
    }
}

#[tokio::test]
async fn missing_build_cli_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), ALWAYS_PASS_SCRIPT);

    let config = ValidationConfig::new(
        dir.path().to_path_buf(),
        vec!["definitely-not-a-real-binary-9f2c".to_string()],
    )
    .unwrap();
    let validator = BuildValidator::new(config, Arc::new(EmptyProvider)).unwrap();
    let result = validator.validate().await;

    assert!(matches!(result, Err(MendError::CliNotFound(_))));
}

#[tokio::test]
async fn missing_project_dir_is_fatal() {
    let config = ValidationConfig::new(
        PathBuf::from("/nonexistent/workdir-9f2c"),
        vec!["sh".to_string(), "build.sh".to_string()],
    )
    .unwrap();
    let validator = BuildValidator::new(config, Arc::new(EmptyProvider)).unwrap();
    let result = validator.validate().await;

    assert!(matches!(result, Err(MendError::ProjectDirMissing(_))));
}

#[tokio::test]
async fn cancellation_is_honored_between_attempts() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), ALWAYS_PASS_SCRIPT);

    let validator = BuildValidator::new(test_config(dir.path()), Arc::new(EmptyProvider)).unwrap();
    validator.cancel_flag().store(true, Ordering::SeqCst);
    let report = validator.validate().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.total_attempts, 0);
    assert!(report.final_errors.is_empty());
    assert!(report.message.contains("cancelled"));
    report.check_invariants().unwrap();
}

#[tokio::test]
async fn setup_command_problems_are_warnings() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), ALWAYS_PASS_SCRIPT);
    std::fs::write(dir.path().join("setup.sh"), "#!/bin/sh\nexit 1\n").unwrap();

    let config = test_config(dir.path())
        .with_setup_command(vec!["sh".to_string(), "setup.sh".to_string()]);
    let validator = BuildValidator::new(config, Arc::new(EmptyProvider)).unwrap();
    let report = validator.validate().await.unwrap();

    assert!(report.success, "setup problems must not fail the run");
    assert!(report.warnings.iter().any(|w| w.contains("setup.sh")));
}

// ---------------------------------------------------------------------------
// Session registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_runs_session_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), ALWAYS_PASS_SCRIPT);

    let registry = SessionRegistry::new();
    registry
        .start("session-1", test_config(dir.path()), Arc::new(EmptyProvider))
        .await
        .unwrap();

    let report = poll_result(&registry, "session-1").await;
    assert!(report.success);

    let progress = registry.progress("session-1").await.unwrap();
    assert!(!progress.steps.is_empty());
    assert!(progress.current_step.is_some());
}

#[tokio::test]
async fn registry_rejects_concurrent_start_for_same_session() {
    let dir = tempfile::tempdir().unwrap();
    // Slow build keeps the first run in flight.
    write_project(dir.path(), "#!/bin/sh\nsleep 2\necho ok\nexit 0\n");

    let registry = SessionRegistry::new();
    registry
        .start("session-2", test_config(dir.path()), Arc::new(EmptyProvider))
        .await
        .unwrap();

    let second = registry
        .start("session-2", test_config(dir.path()), Arc::new(EmptyProvider))
        .await;
    assert!(matches!(second, Err(MendError::SessionActive(_))));

    // Other session ids are unaffected.
    let other_dir = tempfile::tempdir().unwrap();
    write_project(other_dir.path(), ALWAYS_PASS_SCRIPT);
    registry
        .start("session-3", test_config(other_dir.path()), Arc::new(EmptyProvider))
        .await
        .unwrap();
}

#[tokio::test]
async fn registry_polling_tolerates_unknown_session() {
    let registry = SessionRegistry::new();
    assert!(matches!(
        registry.result("not-started-yet").await,
        Err(MendError::SessionNotFound(_))
    ));
}

async fn poll_result(
    registry: &SessionRegistry,
    session_id: &str,
) -> buildmend_core::ValidationReport {
    for _ in 0..200 {
        if let Some(report) = registry.result(session_id).await.unwrap() {
            return report;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("session {session_id} did not finish in time");
}
