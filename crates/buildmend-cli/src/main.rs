//! Buildmend - build validation and repair CLI
//!
//! The `buildmend` command validates a generated data-transformation
//! project: it runs the build tool, classifies failures, requests repairs
//! from a fix-suggestion service, applies them, retries up to a bounded
//! budget, and pushes applied fixes to the git remote on success.
//!
//! ## Commands
//!
//! - `validate`: run the full build → fix → rebuild loop
//! - `probe`: check which build-CLI variant is installed
//! - `parse`: classify a saved build log into structured errors

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{warn, Level};

use buildmend_core::{
    BuildError, BuildOutputParser, BuildValidator, FilePatch, FixProvider, HttpFixService,
    RemoteConfig, ValidationConfig,
};

#[derive(Parser)]
#[command(name = "buildmend")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automated build validation and repair for generated data projects", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build → fix → rebuild validation loop against a project
    Validate {
        /// Project directory (the working copy)
        #[arg(short, long, default_value = ".")]
        project_dir: PathBuf,

        /// Build command to run (quoted, e.g. "dbt build --full-refresh")
        #[arg(short, long, default_value = "dbt build --full-refresh")]
        command: String,

        /// Setup commands run once before the first attempt (repeatable)
        #[arg(long)]
        setup: Vec<String>,

        /// Maximum number of build attempts
        #[arg(long, default_value = "3")]
        max_attempts: u32,

        /// Per-build timeout in seconds
        #[arg(long, default_value = "600")]
        timeout: u64,

        /// Fix-suggestion service endpoint (omit to disable auto-repair)
        #[arg(long, env = "BUILDMEND_FIX_ENDPOINT")]
        fix_endpoint: Option<String>,

        /// Fix-suggestion service token
        #[arg(long, env = "BUILDMEND_FIX_TOKEN", hide_env_values = true)]
        fix_token: Option<String>,

        /// Git remote URL to push applied fixes to (omit to disable push)
        #[arg(long)]
        remote_url: Option<String>,

        /// Access token for the remote
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        remote_token: Option<String>,

        /// Branch to push to (default: auto-detect)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Check which build-CLI variant is installed
    Probe {
        /// Executable to probe
        #[arg(default_value = "dbt")]
        program: String,

        /// Probe timeout in seconds
        #[arg(long, default_value = "15")]
        timeout: u64,
    },

    /// Classify a saved build log into structured errors
    Parse {
        /// Path to the captured build output
        log_file: PathBuf,
    },
}

/// Provider used when no fix endpoint is configured: proposes nothing, so
/// any failing build terminates on the unfixable path after one attempt.
struct DisabledFixProvider;

#[async_trait]
impl FixProvider for DisabledFixProvider {
    async fn propose(
        &self,
        _errors: &[BuildError],
        _files: &BTreeMap<String, String>,
    ) -> buildmend_core::Result<Vec<FilePatch>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    buildmend_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate {
            project_dir,
            command,
            setup,
            max_attempts,
            timeout,
            fix_endpoint,
            fix_token,
            remote_url,
            remote_token,
            branch,
        } => {
            cmd_validate(
                project_dir,
                &command,
                setup,
                max_attempts,
                timeout,
                fix_endpoint,
                fix_token,
                remote_url,
                remote_token,
                branch,
            )
            .await
        }
        Commands::Probe { program, timeout } => cmd_probe(&program, timeout).await,
        Commands::Parse { log_file } => cmd_parse(&log_file),
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_validate(
    project_dir: PathBuf,
    command: &str,
    setup: Vec<String>,
    max_attempts: u32,
    timeout: u64,
    fix_endpoint: Option<String>,
    fix_token: Option<String>,
    remote_url: Option<String>,
    remote_token: Option<String>,
    branch: Option<String>,
) -> Result<()> {
    let build_command = split_command(command)?;

    let mut config = ValidationConfig::new(project_dir, build_command)
        .context("invalid validation configuration")?
        .with_max_attempts(max_attempts)
        .with_build_timeout(timeout);

    for setup_command in setup {
        config = config.with_setup_command(split_command(&setup_command)?);
    }

    if let Some(url) = remote_url {
        config = config.with_remote(RemoteConfig {
            url,
            token: remote_token,
            branch,
        });
    }

    let provider: Arc<dyn FixProvider> = match fix_endpoint {
        Some(endpoint) => Arc::new(HttpFixService::new(endpoint, fix_token)),
        None => {
            warn!("no fix endpoint configured; failing builds will not be repaired");
            Arc::new(DisabledFixProvider)
        }
    };

    let validator = BuildValidator::new(config, provider)?;
    let report = validator.validate().await.context("validation run aborted")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.success {
        Ok(())
    } else {
        anyhow::bail!("{}", report.message)
    }
}

async fn cmd_probe(program: &str, timeout: u64) -> Result<()> {
    let info = buildmend_core::probe_cli(program, timeout).await;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn cmd_parse(log_file: &PathBuf) -> Result<()> {
    let output = std::fs::read_to_string(log_file)
        .with_context(|| format!("failed to read {}", log_file.display()))?;
    let parser = BuildOutputParser::new();
    let errors = parser.parse(&output);
    println!("{}", serde_json::to_string_pretty(&errors)?);
    Ok(())
}

/// Split a quoted command string on whitespace.
fn split_command(command: &str) -> Result<Vec<String>> {
    let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        anyhow::bail!("command cannot be empty");
    }
    Ok(parts)
}
