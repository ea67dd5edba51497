//! Fix-suggestion service client and repair-context assembly.
//!
//! The repair service is an opaque request/response boundary: structured
//! errors plus relevant file contents go in, proposed file patches come out.
//! The [`FixProvider`] trait is the injection seam — production uses the
//! HTTP client, tests use a deterministic stub.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::diagnostic::{BuildError, ErrorCategory};
use crate::domain::error::{MendError, Result};
use crate::domain::fix::FilePatch;

/// Cap on how many errors are sent to the service per attempt.
pub const DEFAULT_MAX_ERRORS_PER_REQUEST: usize = 5;

/// Lines of a seed/CSV file included in repair context.
const CSV_PREVIEW_LINES: usize = 15;

/// Trait for repair-suggestion backends.
#[async_trait]
pub trait FixProvider: Send + Sync {
    /// Propose patches for the given errors and file contents.
    async fn propose(
        &self,
        errors: &[BuildError],
        files: &BTreeMap<String, String>,
    ) -> Result<Vec<FilePatch>>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Request body sent to the fix-suggestion service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixRequest {
    pub errors: Vec<BuildError>,
    pub files: BTreeMap<String, String>,
    pub max_fixes: usize,
}

/// Response body from the fix-suggestion service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixResponse {
    #[serde(default)]
    pub fixes: Vec<FilePatch>,

    /// Optional service-side diagnosis summary.
    #[serde(default)]
    pub explanation: Option<String>,
}

/// HTTP-backed fix-suggestion client.
pub struct HttpFixService {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpFixService {
    /// Create a client for the given service endpoint.
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("buildmend/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl FixProvider for HttpFixService {
    async fn propose(
        &self,
        errors: &[BuildError],
        files: &BTreeMap<String, String>,
    ) -> Result<Vec<FilePatch>> {
        let request = FixRequest {
            errors: errors.to_vec(),
            files: files.clone(),
            max_fixes: errors.len(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| MendError::FixService(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MendError::FixService(format!(
                "service returned {status}: {body}"
            )));
        }

        let parsed: FixResponse = response
            .json()
            .await
            .map_err(|e| MendError::FixService(format!("invalid response body: {e}")))?;

        info!(fixes = parsed.fixes.len(), "fix service responded");
        Ok(parsed.fixes)
    }
}

// ---------------------------------------------------------------------------
// Engine: prioritization, context gathering, patch validation
// ---------------------------------------------------------------------------

/// Drives one repair request per failed attempt: selects errors, gathers
/// file context fresh from the working copy, calls the provider, and
/// validates every returned patch target.
pub struct FixEngine {
    provider: std::sync::Arc<dyn FixProvider>,
    project_dir: PathBuf,
    max_errors: usize,
    ref_pattern: Regex,
}

impl FixEngine {
    /// Create an engine over the given provider and working copy.
    pub fn new(provider: std::sync::Arc<dyn FixProvider>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            project_dir: project_dir.into(),
            max_errors: DEFAULT_MAX_ERRORS_PER_REQUEST,
            ref_pattern: Regex::new(r#"ref\(['"](\w+)['"]\)"#).expect("static ref pattern"),
        }
    }

    /// Override the per-request error cap.
    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Request fixes for the current attempt's errors. Called exactly once
    /// per attempt that has errors. Unusable patches are discarded with a
    /// logged warning; the caller treats an empty result as unfixable.
    pub async fn generate(&self, errors: &[BuildError]) -> Result<Vec<FilePatch>> {
        if errors.is_empty() {
            return Ok(Vec::new());
        }

        let selected = self.prioritize(errors);
        let context = self.gather_context(&selected);
        debug!(
            errors = selected.len(),
            files = context.len(),
            "requesting fixes"
        );

        let proposed = self.provider.propose(&selected, &context).await?;
        Ok(self.validate_patches(proposed))
    }

    /// Order errors by how fixable/root-cause-like their category is and
    /// cap the selection.
    fn prioritize(&self, errors: &[BuildError]) -> Vec<BuildError> {
        fn rank(category: ErrorCategory) -> usize {
            match category {
                ErrorCategory::Syntax => 0,
                ErrorCategory::Compile => 1,
                ErrorCategory::ReferenceError => 2,
                ErrorCategory::TestFailure => 3,
                ErrorCategory::Permission => 4,
                ErrorCategory::Connection => 5,
                ErrorCategory::Unknown => 6,
            }
        }

        let mut sorted = errors.to_vec();
        sorted.sort_by_key(|e| rank(e.category));
        sorted.truncate(self.max_errors);
        sorted
    }

    /// Collect file contents relevant to the selected errors, fresh from
    /// the working copy: the failing files, the project config, upstream
    /// ref() targets, and seed previews for test failures.
    fn gather_context(&self, errors: &[BuildError]) -> BTreeMap<String, String> {
        let mut context = BTreeMap::new();

        for error in errors {
            if let Some(file) = &error.file {
                self.read_into(&mut context, file, None);
            }
        }

        self.read_into(&mut context, "dbt_project.yml", None);

        // Upstream ref() targets named inside the failing files.
        let ref_names: Vec<String> = context
            .values()
            .flat_map(|content| {
                self.ref_pattern
                    .captures_iter(content)
                    .map(|c| c[1].to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        for name in ref_names {
            for prefix in ["models/staging", "models/intermediate", "models/marts", "seeds"] {
                for ext in [".sql", ".csv"] {
                    let candidate = format!("{prefix}/{name}{ext}");
                    let preview = (ext == ".csv").then_some(CSV_PREVIEW_LINES);
                    self.read_into(&mut context, &candidate, preview);
                }
            }
        }

        // Seed data previews for failing tests.
        for error in errors {
            if error.category != ErrorCategory::TestFailure {
                continue;
            }
            let Some(entity) = &error.entity else { continue };
            let seeds_dir = self.project_dir.join("seeds");
            let Ok(entries) = std::fs::read_dir(&seeds_dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "csv") != Some(true) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if entity.contains(stem) || stem.contains(entity.as_str()) {
                    let rel = format!("seeds/{stem}.csv");
                    self.read_into(&mut context, &rel, Some(CSV_PREVIEW_LINES + 5));
                }
            }
        }

        context
    }

    fn read_into(&self, context: &mut BTreeMap<String, String>, rel: &str, preview: Option<usize>) {
        if context.contains_key(rel) {
            return;
        }
        let path = self.project_dir.join(rel);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return;
        };
        let content = match preview {
            Some(lines) => content
                .lines()
                .take(lines)
                .collect::<Vec<_>>()
                .join("\n"),
            None => content,
        };
        context.insert(rel.to_string(), content);
    }

    /// Keep only patches whose target resolves to an existing file inside
    /// the working copy. Everything else is discarded with a warning.
    fn validate_patches(&self, patches: Vec<FilePatch>) -> Vec<FilePatch> {
        let Ok(root) = self.project_dir.canonicalize() else {
            warn!(project_dir = %self.project_dir.display(), "working copy vanished, discarding all fixes");
            return Vec::new();
        };

        patches
            .into_iter()
            .filter(|patch| match self.resolve_target(&root, &patch.file_path) {
                Some(_) => true,
                None => {
                    warn!(
                        target = %patch.file_path,
                        "discarding fix for a path outside or missing from the working copy"
                    );
                    false
                }
            })
            .collect()
    }

    fn resolve_target(&self, root: &Path, rel: &str) -> Option<PathBuf> {
        let resolved = self.project_dir.join(rel).canonicalize().ok()?;
        (resolved.is_file() && resolved.starts_with(root)).then_some(resolved)
    }
}
