//! Build-CLI capability detection.
//!
//! Identifies which variant of the build tool is on PATH before the first
//! attempt: the cloud variant can authenticate against the remote execution
//! backend; the core variant is a degraded fallback that still builds
//! locally. A degraded variant is a warning, not a failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::domain::report::{CliInfo, CliMode};

/// Locate an executable on PATH, honoring an absolute/relative path as-is.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

/// Probe the build CLI: availability, variant, and version.
///
/// A probe that cannot run (missing binary, timeout, spawn failure) yields
/// `available=false` rather than an error — the orchestrator decides whether
/// that is fatal.
pub async fn probe_cli(program: &str, timeout_secs: u64) -> CliInfo {
    let Some(path) = find_in_path(program) else {
        debug!(program, "build CLI not found on PATH");
        return CliInfo::not_found();
    };

    let output = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        Command::new(&path).arg("--version").output(),
    )
    .await;

    let raw = match output {
        Ok(Ok(out)) => format!(
            "{}\n{}",
            String::from_utf8_lossy(&out.stdout).trim(),
            String::from_utf8_lossy(&out.stderr).trim()
        )
        .trim()
        .to_string(),
        _ => {
            // Binary exists but the probe did not answer; report it as
            // present-but-unidentified so the run can still proceed.
            return CliInfo {
                available: true,
                path: Some(path.display().to_string()),
                version: None,
                mode: CliMode::Unknown,
                raw: String::new(),
            };
        }
    };

    CliInfo {
        available: true,
        path: Some(path.display().to_string()),
        version: extract_version(&raw),
        mode: classify_banner(&raw),
        raw,
    }
}

/// Classify the version banner into a CLI variant.
pub fn classify_banner(raw: &str) -> CliMode {
    let lower = raw.to_ascii_lowercase();
    if raw.contains("dbt Cloud CLI") || lower.contains("cloud-cli") {
        CliMode::CloudCli
    } else if raw.contains("dbt Core") || lower.contains("installed:") {
        CliMode::Core
    } else {
        CliMode::Unknown
    }
}

/// Extract the first MAJOR.MINOR.PATCH version from a banner.
pub fn extract_version(raw: &str) -> Option<String> {
    let re = Regex::new(r"(\d+\.\d+\.\d+)").expect("static version regex");
    re.captures(raw).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_cloud_cli_banner() {
        let raw = "dbt Cloud CLI - 0.38.5 (2024-05-01)";
        assert_eq!(classify_banner(raw), CliMode::CloudCli);
    }

    #[test]
    fn test_classify_core_banner() {
        let raw = "Core:\n  - installed: 1.8.1\n  - latest:    1.8.2";
        assert_eq!(classify_banner(raw), CliMode::Core);
    }

    #[test]
    fn test_classify_unknown_banner() {
        assert_eq!(classify_banner("some other tool 2.0"), CliMode::Unknown);
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(
            extract_version("dbt Cloud CLI - 0.38.5"),
            Some("0.38.5".to_string())
        );
        assert_eq!(extract_version("no version here"), None);
    }

    #[test]
    fn test_find_in_path_resolves_sh() {
        let path = find_in_path("sh").expect("sh should exist on PATH");
        assert!(path.is_file());
    }

    #[test]
    fn test_find_in_path_missing() {
        assert!(find_in_path("definitely-not-a-real-binary-9f2c").is_none());
    }

    #[tokio::test]
    async fn test_probe_missing_binary() {
        let info = probe_cli("definitely-not-a-real-binary-9f2c", 5).await;
        assert!(!info.available);
        assert_eq!(info.mode, CliMode::NotFound);
        assert!(info.path.is_none());
    }

    #[tokio::test]
    async fn test_probe_real_binary_is_available() {
        // `sh --version` answers on GNU systems and fails gracefully
        // elsewhere; either way the binary must be reported available.
        let info = probe_cli("sh", 5).await;
        assert!(info.available);
        assert!(info.path.is_some());
    }
}
