// ABOUTME: Provider trait for the container engine that hosts execution sandboxes
// ABOUTME: Defines the create, inject, start, wait, log, kill, and remove operations the lifecycle needs

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;

pub use docker::DockerProvider;

/// Label marking containers owned by the execution engine
pub const MANAGED_LABEL: &str = "hacklens.sandbox.managed";

/// Label carrying the language a sandbox was created for
pub const LANGUAGE_LABEL: &str = "hacklens.sandbox.language";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ProviderError {
    /// Whether the failure means the engine itself could not be reached
    pub fn is_connection(&self) -> bool {
        matches!(self, ProviderError::ConnectionError(_))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Hard limits applied to every sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    pub memory_mb: u64,
    pub cpu_cores: f32,
    pub pids_limit: i64,
    /// On-disk cap for the engine's log of the sandbox; `None` keeps the engine default
    pub log_max_bytes: Option<u64>,
}

/// Container configuration for creating sandboxes
///
/// Providers always create sandboxes with networking disabled, no host mounts,
/// and no TTY. Nothing in this config can turn those on.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub limits: SandboxLimits,
    pub labels: HashMap<String, String>,
}

/// How the sandboxed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i64,
    pub oom_killed: bool,
}

/// Combined stdout/stderr read back from a sandbox
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedOutput {
    pub data: Vec<u8>,
    pub truncated: bool,
}

/// A managed container as seen by engine-side enumeration
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: String,
    pub language: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Container engine backing the sandboxes
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check if the engine is reachable
    async fn is_available(&self) -> Result<bool>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Fetch an image from its registry
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    /// Extract a tar archive into a directory inside the container
    async fn upload_archive(&self, container_id: &str, dest_path: &str, archive: Vec<u8>)
        -> Result<()>;

    /// Start a created container
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Wait until the container's process exits. Callers bound this with a deadline.
    async fn wait_container(&self, container_id: &str) -> Result<ExitStatus>;

    /// Kill the container's process immediately
    async fn kill_container(&self, container_id: &str) -> Result<()>;

    /// Read the combined stdout/stderr stream, stopping after `max_bytes` when set
    async fn collect_output(
        &self,
        container_id: &str,
        max_bytes: Option<usize>,
    ) -> Result<CapturedOutput>;

    /// Remove a container and its anonymous volumes
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;

    /// List all containers carrying the managed label, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;
}
