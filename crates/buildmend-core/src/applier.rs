//! Patch application to the working copy.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::domain::error::Result;
use crate::domain::fix::FilePatch;

/// Applies validated patches to the working copy, reporting which files
/// actually changed on disk.
#[derive(Debug, Clone)]
pub struct PatchApplier {
    project_dir: PathBuf,
}

impl PatchApplier {
    /// Create an applier for the given working copy.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// Apply each patch as a full-content replacement with a normalized
    /// trailing newline. Returns the paths physically written.
    ///
    /// Idempotent: a patch whose content already matches the file is
    /// skipped, so a second application of the same patch changes nothing
    /// and reports nothing.
    pub fn apply(&self, patches: &[FilePatch]) -> Result<Vec<String>> {
        let mut written = Vec::new();

        for patch in patches {
            let target = self.project_dir.join(&patch.file_path);
            let content = normalize(&patch.new_content);

            if let Ok(existing) = std::fs::read_to_string(&target) {
                if existing == content {
                    debug!(file = %patch.file_path, "patch already applied, skipping");
                    continue;
                }
            }

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &content)?;
            info!(file = %patch.file_path, explanation = %patch.explanation, "applied fix");
            written.push(patch.file_path.clone());
        }

        Ok(written)
    }
}

/// Ensure exactly one trailing newline.
fn normalize(content: &str) -> String {
    format!("{}\n", content.trim_end_matches('\n'))
}
