//! Proposed file repairs returned by the fix-suggestion service.

use serde::{Deserialize, Serialize};

/// A proposed full-content replacement for one file in the working copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilePatch {
    /// Path of the file being repaired (relative to the working copy).
    pub file_path: String,

    /// Complete replacement content for the file.
    pub new_content: String,

    /// Human-readable diagnosis/explanation of the repair.
    pub explanation: String,
}

impl FilePatch {
    /// Create a new patch.
    pub fn new(
        file_path: impl Into<String>,
        new_content: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            new_content: new_content.into(),
            explanation: explanation.into(),
        }
    }
}
