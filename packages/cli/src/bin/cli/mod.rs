// ABOUTME: Shared helpers for hacklens-exec subcommands
// ABOUTME: Builds executor settings from the environment plus command-line overrides

pub mod engine;
pub mod run;

use anyhow::{Context, Result};
use clap::Args;
use hacklens_sandbox::{ExecutorSettings, PullPolicy, REGISTRY};
use std::path::Path;

/// Flags that override `HACKLENS_EXEC_*` variables for one invocation
#[derive(Args, Debug, Default, Clone)]
pub struct SettingsArgs {
    /// Execution deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Sandbox memory ceiling in MB
    #[arg(long)]
    pub memory_mb: Option<u64>,

    /// Maximum captured output in bytes (0 disables truncation)
    #[arg(long)]
    pub max_output_bytes: Option<usize>,

    /// Image pull policy: if-missing, always, never
    #[arg(long)]
    pub pull_policy: Option<PullPolicy>,
}

impl SettingsArgs {
    pub fn load(&self) -> Result<ExecutorSettings> {
        let settings = ExecutorSettings::from_env().context("Invalid HACKLENS_EXEC_* setting")?;
        self.apply(settings)
    }

    fn apply(&self, mut settings: ExecutorSettings) -> Result<ExecutorSettings> {
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        if let Some(memory_mb) = self.memory_mb {
            settings.memory_mb = memory_mb;
        }
        if let Some(max_output_bytes) = self.max_output_bytes {
            settings.max_output_bytes = max_output_bytes;
        }
        if let Some(pull_policy) = self.pull_policy {
            settings.pull_policy = pull_policy;
        }

        settings
            .validate()
            .context("Invalid command-line setting")?;
        Ok(settings)
    }
}

/// Guess the language from a source file extension using the built-in profiles
pub fn infer_language(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?;
    REGISTRY
        .for_extension(extension)
        .map(|profile| profile.id.as_str())
}
