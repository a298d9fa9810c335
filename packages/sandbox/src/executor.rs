// ABOUTME: Public entry point that turns {language, code} requests into {status, output} results
// ABOUTME: Validates, resolves profiles, bounds concurrency, drives the lifecycle, and normalizes outcomes

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::error::{ErrorKind, ExecutionError, Result};
use crate::languages::{normalize_language, LanguageProfile, LanguageRegistry};
use crate::lifecycle::{RunReport, SandboxLifecycle, SandboxState};
use crate::providers::{ContainerSummary, DockerProvider, Provider};
use crate::settings::ExecutorSettings;
use crate::types::{render_output, ExecutionRequest, ExecutionResult, ExecutionStatus};

/// Engine reachability and image readiness
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub engine_available: bool,
    pub images: Vec<ImageStatus>,
    pub live_sandboxes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageStatus {
    pub language: String,
    pub image: String,
    pub present: bool,
}

/// Result of pulling one profile image ahead of traffic
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchOutcome {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What an orphan sweep found and removed
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReapReport {
    pub found: usize,
    pub removed: usize,
    pub errors: Vec<String>,
}

/// Runs untrusted code in sandboxes, one sandbox per request
pub struct CodeExecutor {
    provider: Arc<dyn Provider>,
    registry: Arc<LanguageRegistry>,
    settings: ExecutorSettings,
    lifecycle: SandboxLifecycle,
    permits: Semaphore,
}

impl CodeExecutor {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<LanguageRegistry>,
        settings: ExecutorSettings,
    ) -> Self {
        let lifecycle = SandboxLifecycle::new(provider.clone(), &settings);
        let permits = Semaphore::new(settings.max_concurrent.min(Semaphore::MAX_PERMITS));

        Self {
            provider,
            registry,
            settings,
            lifecycle,
            permits,
        }
    }

    /// Connect to the local Docker engine with the built-in language profiles
    ///
    /// This is the one place an unreachable engine is fatal.
    pub async fn connect(settings: ExecutorSettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| ExecutionError::InvalidRequest(e.to_string()))?;

        let provider = DockerProvider::with_pull_timeout(settings.pull_timeout())
            .map_err(|e| ExecutionError::EngineUnavailable(e.to_string()))?;

        match provider.is_available().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ExecutionError::EngineUnavailable(
                    "Docker daemon did not answer ping".to_string(),
                ))
            }
            Err(e) => return Err(ExecutionError::EngineUnavailable(e.to_string())),
        }

        info!(
            "Connected to Docker engine (max concurrent sandboxes: {}, timeout: {}s)",
            settings.max_concurrent, settings.timeout_secs
        );

        Ok(Self::new(
            Arc::new(provider),
            Arc::new(LanguageRegistry::default()),
            settings,
        ))
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute one request. Every failure comes back as an error result.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let language = normalize_language(&request.language);

        match self.try_execute(&language, &request.code).await {
            Ok(report) => self.to_result(report),
            Err(e) => {
                match e.kind() {
                    ErrorKind::UnsupportedLanguage | ErrorKind::InvalidRequest => {
                        debug!("Rejected request for '{}': {}", language, e)
                    }
                    ErrorKind::CapacityExhausted => warn!("{}", e),
                    _ => error!("Execution for '{}' failed: {}", language, e),
                }
                e.into()
            }
        }
    }

    async fn try_execute(&self, language: &str, code: &str) -> Result<RunReport> {
        if language.is_empty() {
            return Err(ExecutionError::InvalidRequest(
                "language must not be empty".to_string(),
            ));
        }

        let profile = self
            .registry
            .resolve(language)
            .map_err(|_| ExecutionError::UnsupportedLanguage(language.to_string()))?;

        if code.len() > self.settings.max_source_bytes {
            return Err(ExecutionError::InvalidRequest(format!(
                "source is {} bytes, limit is {}",
                code.len(),
                self.settings.max_source_bytes
            )));
        }

        let source = profile.source_file();
        let archive = archive::build(&source.filename, code)?;

        let _permit = self.acquire_permit().await?;
        self.lifecycle.run(profile, &source, archive).await
    }

    async fn acquire_permit(&self) -> Result<SemaphorePermit<'_>> {
        let closed = |_| ExecutionError::EngineUnavailable("executor is shutting down".to_string());

        match self.settings.queue_timeout() {
            None => self.permits.acquire().await.map_err(closed),
            Some(wait) if wait.is_zero() => {
                self.permits
                    .try_acquire()
                    .map_err(|_| ExecutionError::CapacityExhausted { waited_secs: 0 })
            }
            Some(wait) => match tokio::time::timeout(wait, self.permits.acquire()).await {
                Ok(permit) => permit.map_err(closed),
                Err(_) => Err(ExecutionError::CapacityExhausted {
                    waited_secs: wait.as_secs(),
                }),
            },
        }
    }

    fn to_result(&self, report: RunReport) -> ExecutionResult {
        let output = render_output(&report.output);

        let (kind, diagnostic) = match report.state {
            SandboxState::Completed if report.exit_code == Some(0) => {
                return ExecutionResult::success(output);
            }
            SandboxState::Completed => (
                ErrorKind::RuntimeFailure,
                format!(
                    "process exited with code {}",
                    report.exit_code.unwrap_or(-1)
                ),
            ),
            SandboxState::TimedOut => (
                ErrorKind::TimeoutExceeded,
                report.diagnostic.unwrap_or_else(|| "execution timed out".to_string()),
            ),
            _ => (
                ErrorKind::Crashed,
                report.diagnostic.unwrap_or_else(|| "sandbox crashed".to_string()),
            ),
        };

        ExecutionResult {
            status: ExecutionStatus::Error,
            output: if output.is_empty() {
                diagnostic.clone()
            } else {
                output
            },
            diagnostic: Some(diagnostic),
            error_kind: Some(kind),
            exit_code: report.exit_code,
        }
    }

    /// Supported language profiles
    pub fn languages(&self) -> Vec<&LanguageProfile> {
        self.registry.list()
    }

    pub async fn health(&self) -> HealthReport {
        let engine_available = self.provider.is_available().await.unwrap_or(false);

        let mut images = Vec::new();
        for profile in self.registry.list() {
            let present = engine_available
                && self
                    .provider
                    .image_exists(&profile.image)
                    .await
                    .unwrap_or(false);
            images.push(ImageStatus {
                language: profile.id.clone(),
                image: profile.image.clone(),
                present,
            });
        }

        let live_sandboxes = if engine_available {
            self.live_sandboxes().await.map(|s| s.len()).unwrap_or(0)
        } else {
            0
        };

        HealthReport {
            engine_available,
            images,
            live_sandboxes,
        }
    }

    /// Pull every profile image so first requests skip the fetch
    pub async fn prefetch_images(&self) -> Vec<PrefetchOutcome> {
        let mut outcomes = Vec::new();

        for image in self.registry.images() {
            info!("Prefetching image {}", image);
            let error = match self.provider.pull_image(image).await {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to prefetch {}: {}", image, e);
                    Some(e.to_string())
                }
            };
            outcomes.push(PrefetchOutcome {
                image: image.to_string(),
                error,
            });
        }

        outcomes
    }

    /// Managed sandboxes currently known to the engine
    pub async fn live_sandboxes(&self) -> Result<Vec<ContainerSummary>> {
        self.provider
            .list_containers()
            .await
            .map_err(|e| ExecutionError::EngineUnavailable(e.to_string()))
    }

    /// Force-remove managed sandboxes older than `min_age`
    ///
    /// Sandboxes normally never outlive their request, so anything older than the
    /// execution deadline plus teardown was left behind by a process that died.
    pub async fn reap_orphans(&self, min_age: Duration, dry_run: bool) -> Result<ReapReport> {
        let containers = self.live_sandboxes().await?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(min_age).unwrap_or_else(|_| chrono::Duration::zero());

        info!("Found {} managed sandboxes", containers.len());

        let mut report = ReapReport::default();
        for container in containers {
            let old_enough = container.created_at.map_or(true, |at| at <= cutoff);
            if !old_enough {
                continue;
            }

            report.found += 1;
            warn!(
                "Found orphaned sandbox: {} (state: {})",
                container.name, container.state
            );

            if dry_run {
                continue;
            }

            match self.provider.remove_container(&container.id, true).await {
                Ok(()) => {
                    info!("Removed orphaned sandbox {}", container.name);
                    report.removed += 1;
                }
                Err(e) => {
                    let msg = format!("Failed to remove orphaned sandbox {}: {}", container.name, e);
                    warn!("{}", msg);
                    report.errors.push(msg);
                }
            }
        }

        info!(
            "Orphan sweep complete: found {}, removed {} (failed: {})",
            report.found,
            report.removed,
            report.errors.len()
        );

        Ok(report)
    }
}
