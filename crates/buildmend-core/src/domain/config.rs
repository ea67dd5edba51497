//! Validation run configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::error::{MendError, Result};

/// Default build timeout in seconds (10 minutes).
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 600;
/// Default setup-command timeout in seconds (3 minutes).
pub const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 180;
/// Default version-probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 15;
/// Default number of build attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Version-control remote the publisher pushes applied fixes to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// HTTPS remote URL.
    pub url: String,

    /// Access token injected into the remote URL for authentication.
    pub token: Option<String>,

    /// Branch to push to. `None` means auto-detect from the working copy.
    pub branch: Option<String>,
}

/// Configuration for one validation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationConfig {
    /// Working copy the build tool and patch applier operate on.
    pub project_dir: PathBuf,

    /// Build command and arguments (first element is the executable).
    pub build_command: Vec<String>,

    /// Commands executed once before the first attempt (dependency install,
    /// seed preload). Their failures are warnings, not terminal states.
    pub setup_commands: Vec<Vec<String>>,

    /// Maximum number of build attempts.
    pub max_attempts: u32,

    /// Per-build timeout in seconds.
    pub build_timeout_secs: u64,

    /// Per-setup-command timeout in seconds.
    pub setup_timeout_secs: u64,

    /// Version-probe timeout in seconds.
    pub probe_timeout_secs: u64,

    /// Extra environment variables injected into build subprocesses
    /// (e.g. cloud backend credentials).
    pub build_env: Vec<(String, String)>,

    /// Remote to publish applied fixes to. `None` disables publishing.
    pub remote: Option<RemoteConfig>,
}

impl ValidationConfig {
    /// Create a config with defaults for everything beyond the project dir
    /// and build command. Rejects empty commands and zero budgets.
    pub fn new(project_dir: PathBuf, build_command: Vec<String>) -> Result<Self> {
        let config = Self {
            project_dir,
            build_command,
            setup_commands: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            setup_timeout_secs: DEFAULT_SETUP_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            build_env: Vec::new(),
            remote: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the build timeout.
    pub fn with_build_timeout(mut self, secs: u64) -> Self {
        self.build_timeout_secs = secs;
        self
    }

    /// Add a setup command.
    pub fn with_setup_command(mut self, command: Vec<String>) -> Self {
        self.setup_commands.push(command);
        self
    }

    /// Set the publish remote.
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Inject an environment variable into build subprocesses.
    pub fn with_build_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_env.push((key.into(), value.into()));
        self
    }

    /// Check structural invariants. Working-copy existence is checked at run
    /// start, not here — the directory may be cloned between construction
    /// and execution.
    pub fn validate(&self) -> Result<()> {
        if self.build_command.is_empty() || self.build_command[0].is_empty() {
            return Err(MendError::InvalidConfig(
                "build command cannot be empty".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(MendError::InvalidConfig(
                "max_attempts must be >= 1".to_string(),
            ));
        }
        if self.build_timeout_secs == 0 {
            return Err(MendError::InvalidConfig(
                "build_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(MendError::InvalidConfig(
                "probe_timeout_secs must be > 0".to_string(),
            ));
        }
        for command in &self.setup_commands {
            if command.is_empty() {
                return Err(MendError::InvalidConfig(
                    "setup command cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The build executable name (used by the capability probe).
    pub fn cli_program(&self) -> &str {
        &self.build_command[0]
    }
}
