//! Publisher gate: commit and push applied fixes to the remote.
//!
//! Runs only after a successful build with at least one modified file. A
//! push failure is captured and downgraded to a warning — the build already
//! succeeded locally, so it never overturns the result.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::domain::config::RemoteConfig;
use crate::domain::error::{MendError, Result};
use crate::git;

/// Outcome of one publish invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Commit created and pushed to the remote.
    Pushed { branch: String },
    /// Working tree was already clean; nothing to commit or push.
    NothingToCommit,
    /// Commit/push failed; carries the warning message for the report.
    Failed { warning: String },
}

impl PublishOutcome {
    /// Whether the remote now has the fixes.
    pub fn pushed(&self) -> bool {
        matches!(self, PublishOutcome::Pushed { .. })
    }
}

/// Commits and pushes the working copy's modifications.
pub struct Publisher {
    project_dir: PathBuf,
    remote: RemoteConfig,
}

impl Publisher {
    /// Create a publisher for the given working copy and remote.
    pub fn new(project_dir: impl Into<PathBuf>, remote: RemoteConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            remote,
        }
    }

    /// Commit all working-copy changes and push them to the configured
    /// branch. Failures are converted into [`PublishOutcome::Failed`]
    /// rather than propagated.
    pub fn publish(&self, message: &str) -> PublishOutcome {
        match self.try_publish(message) {
            Ok(outcome) => outcome,
            Err(e) => {
                let warning = format!("push failed: {e}");
                warn!(%warning, "publish gate failure (non-fatal)");
                PublishOutcome::Failed { warning }
            }
        }
    }

    fn try_publish(&self, message: &str) -> Result<PublishOutcome> {
        let dir = &self.project_dir;
        if !git::is_git_repo(dir) {
            return Err(MendError::Git(format!(
                "{} is not a git work tree",
                dir.display()
            )));
        }

        let branch = self
            .remote
            .branch
            .clone()
            .unwrap_or_else(|| git::detect_branch(dir));

        // Point origin at the authenticated URL so the push never prompts.
        let url = self.authenticated_url();
        git::run_git(dir, &["remote", "set-url", "origin", url.as_str()])?;
        git::run_git(dir, &["add", "-A"])?;

        let status = git::run_git(dir, &["status", "--porcelain"])?;
        if status.trim().is_empty() {
            info!("working tree clean, nothing to publish");
            return Ok(PublishOutcome::NothingToCommit);
        }

        git::run_git(
            dir,
            &[
                "-c",
                "user.name=Buildmend Automation",
                "-c",
                "user.email=automation@buildmend.dev",
                "commit",
                "-m",
                message,
            ],
        )?;
        git::run_git(dir, &["push", "origin", branch.as_str()])?;

        info!(%branch, "pushed applied fixes to remote");
        Ok(PublishOutcome::Pushed { branch })
    }

    /// Inject the access token into an HTTPS github.com remote URL.
    fn authenticated_url(&self) -> String {
        match &self.remote.token {
            Some(token) if self.remote.url.contains("github.com") => self
                .remote
                .url
                .replace("https://", &format!("https://{token}@")),
            _ => self.remote.url.clone(),
        }
    }

    /// Commit message for a publish after a successful validation run.
    pub fn commit_message(total_attempts: u32, fix_count: usize) -> String {
        format!(
            "Auto-fix: build validation passed after {total_attempts} attempt(s)\n\n\
             {fix_count} automated fix(es) applied by buildmend."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command;

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

    /// A bare remote plus a working clone with one commit.
    fn remote_and_clone() -> (tempfile::TempDir, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let bare = root.path().join("remote.git");
        std::fs::create_dir_all(&bare).unwrap();
        run(&bare, "git", &["init", "--bare", "-b", "main"]);

        let clone = root.path().join("work");
        run(root.path(), "git", &["clone", bare.to_str().unwrap(), "work"]);
        run(&clone, "git", &["config", "user.name", "test"]);
        run(&clone, "git", &["config", "user.email", "test@example.com"]);
        std::fs::write(clone.join("model.sql"), "select 1\n").unwrap();
        run(&clone, "git", &["add", "-A"]);
        run(&clone, "git", &["commit", "-m", "initial"]);
        run(&clone, "git", &["push", "origin", "main"]);
        (root, clone)
    }

    fn remote_config(url: &str) -> RemoteConfig {
        RemoteConfig {
            url: url.to_string(),
            token: None,
            branch: None,
        }
    }

    #[test]
    fn test_publish_pushes_changes() {
        let (root, clone) = remote_and_clone();
        std::fs::write(clone.join("model.sql"), "select 2\n").unwrap();

        let url = root.path().join("remote.git").display().to_string();
        let publisher = Publisher::new(&clone, remote_config(&url));
        let outcome = publisher.publish("Auto-fix: test");

        assert!(matches!(outcome, PublishOutcome::Pushed { ref branch } if branch == "main"));
        assert!(outcome.pushed());
    }

    #[test]
    fn test_publish_clean_tree_is_nothing_to_commit() {
        let (root, clone) = remote_and_clone();
        let url = root.path().join("remote.git").display().to_string();
        let publisher = Publisher::new(&clone, remote_config(&url));

        let outcome = publisher.publish("Auto-fix: test");
        assert_eq!(outcome, PublishOutcome::NothingToCommit);
        assert!(!outcome.pushed());
    }

    #[test]
    fn test_publish_failure_is_captured_not_propagated() {
        let (_root, clone) = remote_and_clone();
        std::fs::write(clone.join("model.sql"), "select 3\n").unwrap();

        let publisher = Publisher::new(
            &clone,
            remote_config("/nonexistent/path/to/remote.git"),
        );
        let outcome = publisher.publish("Auto-fix: test");

        match outcome {
            PublishOutcome::Failed { warning } => assert!(warning.contains("push failed")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_publish_outside_repo_fails_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path(), remote_config("https://example.com/x.git"));
        assert!(matches!(
            publisher.publish("msg"),
            PublishOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_authenticated_url_injects_token_for_github() {
        let publisher = Publisher::new(
            "/tmp",
            RemoteConfig {
                url: "https://github.com/acme/demo.git".to_string(),
                token: Some("tok123".to_string()),
                branch: None,
            },
        );
        assert_eq!(
            publisher.authenticated_url(),
            "https://tok123@github.com/acme/demo.git"
        );
    }

    #[test]
    fn test_authenticated_url_untouched_without_token() {
        let publisher = Publisher::new("/tmp", remote_config("https://github.com/acme/demo.git"));
        assert_eq!(
            publisher.authenticated_url(),
            "https://github.com/acme/demo.git"
        );
    }

    #[test]
    fn test_commit_message_shape() {
        let message = Publisher::commit_message(2, 3);
        assert!(message.contains("2 attempt(s)"));
        assert!(message.contains("3 automated fix(es)"));
    }
}
