// ABOUTME: Sandbox lifecycle manager driving one execution from allocation to guaranteed teardown
// ABOUTME: Linear state machine with a scoped guard that removes the sandbox on every exit path

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExecutionError, Result};
use crate::languages::{LanguageProfile, SourceFile};
use crate::providers::{
    CapturedOutput, ContainerConfig, ExitStatus, Provider, ProviderError, SandboxLimits,
    LANGUAGE_LABEL,
};
use crate::settings::{ExecutorSettings, PullPolicy};
use crate::types::format_duration;

/// Prefix of every sandbox name; the suffix is a fresh UUID
pub const SANDBOX_NAME_PREFIX: &str = "hacklens-sandbox";

/// Lifecycle states. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Created,
    CodeInjected,
    Running,
    Completed,
    TimedOut,
    Crashed,
    TornDown,
}

impl SandboxState {
    fn rank(self) -> u8 {
        match self {
            SandboxState::Created => 0,
            SandboxState::CodeInjected => 1,
            SandboxState::Running => 2,
            SandboxState::Completed | SandboxState::TimedOut | SandboxState::Crashed => 3,
            SandboxState::TornDown => 4,
        }
    }

    /// Teardown is reachable from every live state; everything else advances one step
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        match next {
            SandboxState::TornDown => self != SandboxState::TornDown,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxState::Created => "CREATED",
            SandboxState::CodeInjected => "CODE_INJECTED",
            SandboxState::Running => "RUNNING",
            SandboxState::Completed => "COMPLETED",
            SandboxState::TimedOut => "TIMED_OUT",
            SandboxState::Crashed => "CRASHED",
            SandboxState::TornDown => "TORN_DOWN",
        };
        f.write_str(name)
    }
}

/// What one sandbox run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub sandbox_name: String,
    /// Concluding state: Completed, TimedOut, or Crashed
    pub state: SandboxState,
    pub exit_code: Option<i64>,
    pub output: CapturedOutput,
    /// Engine-side explanation for TimedOut and Crashed runs
    pub diagnostic: Option<String>,
    pub elapsed: Duration,
    /// Set when removal failed after the result was already determined
    pub teardown_error: Option<String>,
}

/// Scoped handle on one allocated sandbox
///
/// `teardown` must be awaited on every normal path. If the handle is dropped while
/// still armed (panic, or the owning future was cancelled) removal is scheduled on
/// the current runtime instead.
struct Sandbox {
    provider: Arc<dyn Provider>,
    id: String,
    name: String,
    state: SandboxState,
    teardown_timeout: Duration,
    armed: bool,
}

impl Sandbox {
    fn new(
        provider: Arc<dyn Provider>,
        id: String,
        name: String,
        teardown_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            id,
            name,
            state: SandboxState::Created,
            teardown_timeout,
            armed: true,
        }
    }

    fn advance(&mut self, next: SandboxState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal sandbox transition {} -> {}",
            self.state,
            next
        );
        debug!("Sandbox {}: {} -> {}", self.name, self.state, next);
        self.state = next;
    }

    /// Force-remove the sandbox. Failures are returned for logging, never raised.
    ///
    /// The guard stays armed until the removal call resolves, so dropping this
    /// future mid-removal still hands the sandbox to `Drop`.
    async fn teardown(&mut self) -> std::result::Result<(), String> {
        let removal = tokio::time::timeout(
            self.teardown_timeout,
            self.provider.remove_container(&self.id, true),
        )
        .await;

        self.armed = false;
        self.advance(SandboxState::TornDown);

        match removal {
            Ok(Ok(())) => {
                debug!("Removed sandbox {}", self.name);
                Ok(())
            }
            // Already gone counts as torn down
            Ok(Err(ProviderError::NotFound(_))) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "removal did not finish within {}",
                format_duration(self.teardown_timeout)
            )),
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let provider = self.provider.clone();
        let id = self.id.clone();
        let name = self.name.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Sandbox {} dropped in state {} before teardown, scheduling removal",
                    name, self.state
                );
                handle.spawn(async move {
                    match provider.remove_container(&id, true).await {
                        Ok(()) | Err(ProviderError::NotFound(_)) => {
                            debug!("Deferred removal of sandbox {} finished", name)
                        }
                        Err(e) => error!("Deferred removal of sandbox {} failed: {}", name, e),
                    }
                });
            }
            Err(_) => {
                error!(
                    "Sandbox {} dropped outside a runtime and was not removed; reap orphans to clean it up",
                    name
                );
            }
        }
    }
}

/// Drives sandboxes through create, inject, run, collect, and teardown
pub struct SandboxLifecycle {
    provider: Arc<dyn Provider>,
    workdir: String,
    limits: SandboxLimits,
    timeout: Duration,
    pull_policy: PullPolicy,
    output_limit: Option<usize>,
    teardown_timeout: Duration,
}

impl SandboxLifecycle {
    pub fn new(provider: Arc<dyn Provider>, settings: &ExecutorSettings) -> Self {
        Self {
            provider,
            workdir: settings.workdir.clone(),
            limits: settings.limits(),
            timeout: settings.timeout(),
            pull_policy: settings.pull_policy,
            output_limit: settings.output_limit(),
            teardown_timeout: settings.teardown_timeout(),
        }
    }

    /// Run one source file to a concluded state and tear the sandbox down
    ///
    /// Errors are returned only when no verdict could be produced (the sandbox never
    /// existed, or injection/start failed). Any sandbox that was created is removed
    /// before this returns.
    pub async fn run(
        &self,
        profile: &LanguageProfile,
        source: &SourceFile,
        archive: Vec<u8>,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let name = format!("{}-{}", SANDBOX_NAME_PREFIX, Uuid::new_v4().simple());

        let pull_error = self.ensure_image(&profile.image).await;

        let config = ContainerConfig {
            image: profile.image.clone(),
            name: name.clone(),
            command: profile.render_command(source, &self.workdir),
            working_dir: self.workdir.clone(),
            limits: self.limits.clone(),
            labels: HashMap::from([(LANGUAGE_LABEL.to_string(), profile.id.clone())]),
        };

        let container_id = match self.provider.create_container(&config).await {
            Ok(id) => id,
            Err(e) => return Err(creation_error(&profile.image, e, pull_error)),
        };

        info!(
            "Created sandbox {} for {} ({})",
            name, profile.id, source.filename
        );

        let mut sandbox = Sandbox::new(
            self.provider.clone(),
            container_id,
            name,
            self.teardown_timeout,
        );

        let outcome = self.drive(&mut sandbox, archive).await;
        let teardown_error = sandbox.teardown().await.err();

        if let Some(e) = &teardown_error {
            warn!("Teardown of sandbox {} failed: {}", sandbox.name, e);
        }

        let mut report = outcome?;
        report.elapsed = started.elapsed();
        report.teardown_error = teardown_error;

        info!(
            "Sandbox {} finished: {} (exit: {:?}, {:?})",
            report.sandbox_name, report.state, report.exit_code, report.elapsed
        );

        Ok(report)
    }

    /// Make the image available according to the pull policy.
    /// Returns the pull failure, if any, so creation can report it.
    async fn ensure_image(&self, image: &str) -> Option<String> {
        let needs_pull = match self.pull_policy {
            PullPolicy::Never => false,
            PullPolicy::Always => true,
            PullPolicy::IfMissing => match self.provider.image_exists(image).await {
                Ok(exists) => !exists,
                Err(e) => {
                    warn!("Could not inspect image {}: {}", image, e);
                    true
                }
            },
        };

        if !needs_pull {
            return None;
        }

        match self.provider.pull_image(image).await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    "Failed to pull image {}: {}. Attempting sandbox creation anyway",
                    image, e
                );
                Some(e.to_string())
            }
        }
    }

    async fn drive(&self, sandbox: &mut Sandbox, archive: Vec<u8>) -> Result<RunReport> {
        self.provider
            .upload_archive(&sandbox.id, &self.workdir, archive)
            .await
            .map_err(|e| ExecutionError::from_stage(ExecutionError::InjectionFailed, e))?;
        sandbox.advance(SandboxState::CodeInjected);

        self.provider
            .start_container(&sandbox.id)
            .await
            .map_err(|e| ExecutionError::from_stage(ExecutionError::StartFailed, e))?;
        sandbox.advance(SandboxState::Running);

        let waited =
            tokio::time::timeout(self.timeout, self.provider.wait_container(&sandbox.id)).await;

        let (state, exit_code, diagnostic) = match waited {
            Ok(Ok(status)) => self.classify_exit(status),
            Ok(Err(e)) if e.is_connection() => {
                return Err(ExecutionError::EngineUnavailable(e.to_string()));
            }
            Ok(Err(e)) => {
                error!("Lost track of sandbox {}: {}", sandbox.name, e);
                (
                    SandboxState::Crashed,
                    None,
                    Some(format!("sandbox crashed: {}", e)),
                )
            }
            Err(_) => {
                info!(
                    "Sandbox {} exceeded its {:?} deadline, killing",
                    sandbox.name, self.timeout
                );
                let kill = tokio::time::timeout(
                    self.teardown_timeout,
                    self.provider.kill_container(&sandbox.id),
                )
                .await;
                match kill {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Failed to kill sandbox {}: {}", sandbox.name, e),
                    Err(_) => warn!(
                        "Kill of sandbox {} did not finish within {}",
                        sandbox.name,
                        format_duration(self.teardown_timeout)
                    ),
                }
                (
                    SandboxState::TimedOut,
                    None,
                    Some(format!(
                        "execution timed out after {}",
                        format_duration(self.timeout)
                    )),
                )
            }
        };
        sandbox.advance(state);

        let output = self.collect_output(sandbox).await;

        Ok(RunReport {
            sandbox_name: sandbox.name.clone(),
            state,
            exit_code,
            output,
            diagnostic,
            elapsed: Duration::ZERO,
            teardown_error: None,
        })
    }

    fn classify_exit(&self, status: ExitStatus) -> (SandboxState, Option<i64>, Option<String>) {
        if status.oom_killed {
            (
                SandboxState::Crashed,
                Some(status.code),
                Some(format!(
                    "sandbox exceeded its {}MB memory limit",
                    self.limits.memory_mb
                )),
            )
        } else {
            (SandboxState::Completed, Some(status.code), None)
        }
    }

    /// Capture combined output; a failed read yields empty output rather than hiding the verdict
    async fn collect_output(&self, sandbox: &Sandbox) -> CapturedOutput {
        let read = tokio::time::timeout(
            self.teardown_timeout,
            self.provider.collect_output(&sandbox.id, self.output_limit),
        )
        .await;

        match read {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Failed to read output of sandbox {}: {}", sandbox.name, e);
                CapturedOutput::default()
            }
            Err(_) => {
                warn!("Timed out reading output of sandbox {}", sandbox.name);
                CapturedOutput::default()
            }
        }
    }
}

/// Decide which error a failed creation reports
fn creation_error(image: &str, err: ProviderError, pull_error: Option<String>) -> ExecutionError {
    match err {
        ProviderError::ConnectionError(msg) => ExecutionError::EngineUnavailable(msg),
        // The engine answers 404 when the image is absent
        ProviderError::NotFound(msg) => ExecutionError::ImageUnavailable {
            image: image.to_string(),
            reason: match pull_error {
                Some(pull) => format!("{} (pull failed: {})", msg, pull),
                None => msg,
            },
        },
        other => ExecutionError::SandboxCreationFailed(other),
    }
}
