//! Normalized build diagnostic types.

use serde::{Deserialize, Serialize};

/// Category of a build failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Model/SQL compilation failures.
    Compile,
    /// Assertion or data-test failures.
    TestFailure,
    /// Broken references between build units (missing models, columns, schemas).
    ReferenceError,
    /// Permission or authorization failures against the warehouse.
    Permission,
    /// Connectivity failures (network, timeouts, refused connections).
    Connection,
    /// Parsing/validation failures in project or schema files.
    Syntax,
    /// Anything the classifier could not identify.
    Unknown,
}

impl ErrorCategory {
    /// Stable snake_case label, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Compile => "compile",
            ErrorCategory::TestFailure => "test_failure",
            ErrorCategory::ReferenceError => "reference_error",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// A single normalized failure extracted from build output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildError {
    /// Failure category.
    pub category: ErrorCategory,

    /// Model/test/seed name the failure is attributed to, when known.
    pub entity: Option<String>,

    /// Source file path (relative to the working copy), when known.
    pub file: Option<String>,

    /// Human-readable message.
    pub message: String,

    /// Raw diagnostic block from the original output.
    pub evidence: Option<String>,
}

impl BuildError {
    /// Create a new build error.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            entity: None,
            file: None,
            message: message.into(),
            evidence: None,
        }
    }

    /// Set the entity name.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Set the source file path.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Set the raw evidence block.
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    /// One-line summary for progress messages and logs.
    pub fn summary(&self) -> String {
        let mut parts = vec![self.category.as_str().to_string()];
        if let Some(entity) = &self.entity {
            parts.push(format!("in {}", entity));
        }
        if let Some(file) = &self.file {
            parts.push(format!("({})", file));
        }
        let message: String = self.message.chars().take(200).collect();
        parts.push(format!(": {}", message));
        parts.join(" ")
    }
}
