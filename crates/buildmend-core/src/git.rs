//! Git integration utilities for the working copy.

use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::domain::error::{MendError, Result};

/// Artifact paths the build tool writes that must never be committed.
const IGNORED_ARTIFACTS: &[&str] = &["target/", "dbt_packages/", "logs/", "dbt_cloud.yml"];

/// Run a git command in the given directory, capturing output.
///
/// Returns stdout on success; maps a nonzero exit to [`MendError::Git`]
/// carrying stderr.
pub fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .map_err(|e| MendError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MendError::Git(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Detect the checked-out branch of the working copy, defaulting to `main`.
pub fn detect_branch(repo_dir: &Path) -> String {
    match run_git(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"]) {
        Ok(out) => {
            let branch = out.trim();
            if branch.is_empty() || branch == "HEAD" {
                "main".to_string()
            } else {
                branch.to_string()
            }
        }
        Err(_) => "main".to_string(),
    }
}

/// Append build-artifact paths to the working copy's `.gitignore` when
/// missing, so publishes never sweep generated artifacts into a commit.
pub fn ensure_gitignore(repo_dir: &Path) -> Result<()> {
    let gitignore = repo_dir.join(".gitignore");
    let existing = std::fs::read_to_string(&gitignore).unwrap_or_default();

    let additions: Vec<&str> = IGNORED_ARTIFACTS
        .iter()
        .copied()
        .filter(|p| !existing.contains(p))
        .collect();
    if additions.is_empty() {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str("\n# Build artifacts\n");
    for path in &additions {
        content.push_str(path);
        content.push('\n');
    }
    std::fs::write(&gitignore, content)?;
    info!(?additions, "updated .gitignore");
    Ok(())
}
