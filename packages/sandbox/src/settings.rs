// ABOUTME: Execution engine settings with defaults, validation, and environment loading
// ABOUTME: Controls timeouts, sandbox limits, concurrency bounds, output caps, and image pulling

use hacklens_config as env_keys;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::providers::SandboxLimits;

/// Largest accepted memory ceiling (1 TiB)
pub const MAX_MEMORY_MB: u64 = 1024 * 1024;

/// Engine log cap as a multiple of the output cap; json-file framing inflates each line
const LOG_SIZE_FACTOR: u64 = 8;

/// Smallest engine log cap, for tiny output caps
const MIN_LOG_BYTES: u64 = 1024 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },

    #[error("Invalid pull policy: {0}")]
    InvalidPullPolicy(String),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// When to fetch a profile's image before creating a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Pull only when the image is not present locally
    IfMissing,
    /// Pull before every execution
    Always,
    /// Never pull; a missing image fails the request
    Never,
}

impl FromStr for PullPolicy {
    type Err = SettingsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "if-missing" | "ifmissing" | "missing" => Ok(PullPolicy::IfMissing),
            "always" => Ok(PullPolicy::Always),
            "never" => Ok(PullPolicy::Never),
            _ => Err(SettingsError::InvalidPullPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    // Sandbox Limits
    pub timeout_secs: u64,
    pub memory_mb: u64,
    pub cpu_cores: f32,
    pub pids_limit: i64,
    pub workdir: String,

    // Admission & Concurrency
    pub max_concurrent: usize,
    /// How long a request may wait for a free slot. `None` waits indefinitely.
    pub queue_timeout_secs: Option<u64>,

    // Request & Output Bounds
    /// Cap on captured output. Zero disables truncation.
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,

    // Image Handling
    pub pull_policy: PullPolicy,
    pub pull_timeout_secs: u64,

    // Cleanup
    pub teardown_timeout_secs: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            memory_mb: 256,
            cpu_cores: 1.0,
            pids_limit: 128,
            workdir: "/code".to_string(),
            max_concurrent: 4,
            queue_timeout_secs: None,
            max_output_bytes: 1024 * 1024,
            max_source_bytes: 256 * 1024,
            pull_policy: PullPolicy::IfMissing,
            pull_timeout_secs: 600,
            teardown_timeout_secs: 10,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SettingsError::InvalidValue {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

impl ExecutorSettings {
    /// Load settings from `HACKLENS_EXEC_*` variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_TIMEOUT_SECS)? {
            settings.timeout_secs = v;
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_MEMORY_MB)? {
            settings.memory_mb = v;
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_CPU_CORES)? {
            settings.cpu_cores = v;
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_PIDS_LIMIT)? {
            settings.pids_limit = v;
        }
        if let Some(v) = parse_var::<String>(env_keys::HACKLENS_EXEC_WORKDIR)? {
            settings.workdir = v;
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_MAX_CONCURRENT)? {
            settings.max_concurrent = v;
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_QUEUE_TIMEOUT_SECS)? {
            settings.queue_timeout_secs = Some(v);
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_MAX_OUTPUT_BYTES)? {
            settings.max_output_bytes = v;
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_MAX_SOURCE_BYTES)? {
            settings.max_source_bytes = v;
        }
        if let Ok(v) = env::var(env_keys::HACKLENS_EXEC_PULL_POLICY) {
            settings.pull_policy = v.parse()?;
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_PULL_TIMEOUT_SECS)? {
            settings.pull_timeout_secs = v;
        }
        if let Some(v) = parse_var(env_keys::HACKLENS_EXEC_TEARDOWN_TIMEOUT_SECS)? {
            settings.teardown_timeout_secs = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would disable a mandatory limit
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(SettingsError::Invalid(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.memory_mb < 6 || self.memory_mb > MAX_MEMORY_MB {
            // Docker refuses memory limits below 6MB
            return Err(SettingsError::Invalid(format!(
                "memory_mb must be between 6 and {}, got {}",
                MAX_MEMORY_MB, self.memory_mb
            )));
        }
        if !self.cpu_cores.is_finite() || self.cpu_cores <= 0.0 {
            return Err(SettingsError::Invalid(format!(
                "cpu_cores must be a finite positive number, got {}",
                self.cpu_cores
            )));
        }
        if self.pids_limit <= 0 {
            return Err(SettingsError::Invalid(format!(
                "pids_limit must be positive, got {}",
                self.pids_limit
            )));
        }
        if self.max_concurrent == 0 || self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(SettingsError::Invalid(format!(
                "max_concurrent must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                self.max_concurrent
            )));
        }
        if self.max_source_bytes == 0 {
            return Err(SettingsError::Invalid(
                "max_source_bytes must be greater than zero".to_string(),
            ));
        }
        if !self.workdir.starts_with('/') || self.workdir.contains("..") || self.workdir == "/" {
            return Err(SettingsError::Invalid(format!(
                "workdir must be an absolute, non-root path, got '{}'",
                self.workdir
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout_secs.map(Duration::from_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }

    /// Output cap passed to the provider, `None` when truncation is disabled
    pub fn output_limit(&self) -> Option<usize> {
        (self.max_output_bytes > 0).then_some(self.max_output_bytes)
    }

    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            memory_mb: self.memory_mb,
            cpu_cores: self.cpu_cores,
            pids_limit: self.pids_limit,
            log_max_bytes: self.output_limit().map(|limit| {
                (limit as u64)
                    .saturating_mul(LOG_SIZE_FACTOR)
                    .max(MIN_LOG_BYTES)
            }),
        }
    }
}
