// ABOUTME: In-memory provider for exercising the execution engine without a container engine
// ABOUTME: Interprets uploaded sources as small scripts and records every sandbox it hosts

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::providers::{
    CapturedOutput, ContainerConfig, ContainerSummary, ExitStatus, Provider, ProviderError,
    Result, LANGUAGE_LABEL,
};

/// Failures the stub can be told to produce
#[derive(Debug, Clone, Default)]
pub struct StubFaults {
    /// Images are absent until pulled
    pub image_missing: bool,
    pub fail_pull: bool,
    pub fail_create: bool,
    pub fail_upload: bool,
    pub fail_start: bool,
    pub fail_wait: bool,
    pub fail_remove: bool,
    /// Removal sleeps this long before taking effect
    pub remove_delay: Option<Duration>,
    /// Kill sleeps this long before taking effect
    pub kill_delay: Option<Duration>,
    /// Every call reports a connection error
    pub engine_down: bool,
}

/// One line of a stub program
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Print(String),
    Sleep(Duration),
    Exit(i64),
    Oom,
}

/// Parse uploaded source. Lines are `print <text>`, `eprint <text>`, `sleep <ms>`,
/// `exit <code>`, or `oom`; anything else is echoed back verbatim.
fn parse_program(source: &str) -> Vec<Step> {
    source
        .lines()
        .map(|line| {
            let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
            match word {
                "print" | "eprint" => Step::Print(rest.to_string()),
                "sleep" => Step::Sleep(Duration::from_millis(rest.trim().parse().unwrap_or(0))),
                "exit" => Step::Exit(rest.trim().parse().unwrap_or(1)),
                "oom" => Step::Oom,
                _ => Step::Print(line.to_string()),
            }
        })
        .collect()
}

#[derive(Debug)]
struct StubContainer {
    config: ContainerConfig,
    files: Vec<(String, String)>,
    started: bool,
    killed: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    /// Output produced before the first sleep, visible as soon as the process starts
    output: Vec<u8>,
}

#[derive(Debug, Default)]
struct StubState {
    next_id: u64,
    images: Vec<String>,
    containers: HashMap<String, StubContainer>,
    configs: Vec<ContainerConfig>,
    uploads: Vec<(String, String)>,
    created: usize,
    removed: usize,
    killed: usize,
    pulls: usize,
    peak_live: usize,
}

/// Provider that runs "programs" in memory
#[derive(Debug, Default)]
pub struct StubProvider {
    state: Mutex<StubState>,
    faults: StubFaults,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: StubFaults) -> Self {
        Self {
            state: Mutex::new(StubState::default()),
            faults,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_engine(&self) -> Result<()> {
        if self.faults.engine_down {
            return Err(ProviderError::ConnectionError(
                "stub engine is down".to_string(),
            ));
        }
        Ok(())
    }

    fn image_present(&self, state: &StubState, image: &str) -> bool {
        !self.faults.image_missing || state.images.iter().any(|i| i == image)
    }

    /// Sandboxes created so far
    pub fn created_count(&self) -> usize {
        self.state().created
    }

    pub fn removed_count(&self) -> usize {
        self.state().removed
    }

    pub fn killed_count(&self) -> usize {
        self.state().killed
    }

    pub fn pull_count(&self) -> usize {
        self.state().pulls
    }

    /// Sandboxes that exist right now
    pub fn live_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Most sandboxes that ever existed at the same time
    pub fn peak_live(&self) -> usize {
        self.state().peak_live
    }

    pub fn created_configs(&self) -> Vec<ContainerConfig> {
        self.state().configs.clone()
    }

    /// Every file uploaded so far as `(path, content)`, in upload order
    pub fn uploaded_files(&self) -> Vec<(String, String)> {
        self.state().uploads.clone()
    }

    /// Plant a managed container as if a previous process had leaked it
    pub fn plant_orphan(&self, name: &str, created_at: chrono::DateTime<chrono::Utc>) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("orphan-{}", state.next_id);
        let config = ContainerConfig {
            image: "python:3.10-slim".to_string(),
            name: name.to_string(),
            command: vec![],
            working_dir: "/code".to_string(),
            limits: crate::settings::ExecutorSettings::default().limits(),
            labels: HashMap::from([(LANGUAGE_LABEL.to_string(), "python".to_string())]),
        };
        state.containers.insert(
            id.clone(),
            StubContainer {
                config,
                files: vec![],
                started: true,
                killed: false,
                created_at,
                output: vec![],
            },
        );
        id
    }

    fn program(&self, container_id: &str) -> Result<Vec<Step>> {
        let state = self.state();
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        Ok(container
            .files
            .iter()
            .flat_map(|(_, content)| parse_program(content))
            .collect())
    }
}

#[async_trait]
impl Provider for StubProvider {
    async fn is_available(&self) -> Result<bool> {
        Ok(!self.faults.engine_down)
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.check_engine()?;
        let state = self.state();
        Ok(self.image_present(&state, image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.check_engine()?;
        let mut state = self.state();
        state.pulls += 1;
        if self.faults.fail_pull {
            return Err(ProviderError::ImageError(format!(
                "pull access denied for {}",
                image
            )));
        }
        state.images.push(image.to_string());
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        self.check_engine()?;
        let mut state = self.state();
        if !self.image_present(&state, &config.image) {
            return Err(ProviderError::NotFound(format!(
                "No such image: {}",
                config.image
            )));
        }
        if self.faults.fail_create {
            return Err(ProviderError::ContainerError(
                "engine rejected container config".to_string(),
            ));
        }

        state.next_id += 1;
        let id = format!("stub-{:06}", state.next_id);
        state.created += 1;
        state.configs.push(config.clone());
        state.containers.insert(
            id.clone(),
            StubContainer {
                config: config.clone(),
                files: vec![],
                started: false,
                killed: false,
                created_at: chrono::Utc::now(),
                output: vec![],
            },
        );
        state.peak_live = state.peak_live.max(state.containers.len());
        Ok(id)
    }

    async fn upload_archive(
        &self,
        container_id: &str,
        dest_path: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        self.check_engine()?;
        if self.faults.fail_upload {
            return Err(ProviderError::TransferError(
                "archive extraction failed".to_string(),
            ));
        }

        let mut files = Vec::new();
        let mut reader = tar::Archive::new(archive.as_slice());
        let entries = reader
            .entries()
            .map_err(|e| ProviderError::TransferError(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| ProviderError::TransferError(e.to_string()))?;
            let path = entry
                .path()
                .map_err(|e| ProviderError::TransferError(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| ProviderError::TransferError(e.to_string()))?;
            files.push((format!("{}/{}", dest_path, path), content));
        }

        let mut state = self.state();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        container.files.extend(files.iter().cloned());
        state.uploads.extend(files);
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.check_engine()?;
        if self.faults.fail_start {
            return Err(ProviderError::ContainerError(
                "executable file not found in $PATH".to_string(),
            ));
        }

        let program = self.program(container_id)?;
        let mut early = Vec::new();
        for step in &program {
            match step {
                Step::Print(text) => {
                    early.extend_from_slice(text.as_bytes());
                    early.push(b'\n');
                }
                _ => break,
            }
        }

        let mut state = self.state();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        container.started = true;
        container.output = early;
        Ok(())
    }

    async fn wait_container(&self, container_id: &str) -> Result<ExitStatus> {
        self.check_engine()?;
        if self.faults.fail_wait {
            return Err(ProviderError::ContainerError(
                "container vanished while waiting".to_string(),
            ));
        }

        let program = self.program(container_id)?;
        let mut output = Vec::new();
        let mut status = ExitStatus {
            code: 0,
            oom_killed: false,
        };

        for step in program {
            match step {
                Step::Print(text) => {
                    output.extend_from_slice(text.as_bytes());
                    output.push(b'\n');
                }
                Step::Sleep(duration) => tokio::time::sleep(duration).await,
                Step::Exit(code) => {
                    status.code = code;
                    break;
                }
                Step::Oom => {
                    status = ExitStatus {
                        code: 137,
                        oom_killed: true,
                    };
                    break;
                }
            }
        }

        let mut state = self.state();
        if let Some(container) = state.containers.get_mut(container_id) {
            container.output = output;
        }
        Ok(status)
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        self.check_engine()?;
        if let Some(delay) = self.faults.kill_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        container.killed = true;
        state.killed += 1;
        Ok(())
    }

    async fn collect_output(
        &self,
        container_id: &str,
        max_bytes: Option<usize>,
    ) -> Result<CapturedOutput> {
        self.check_engine()?;
        let state = self.state();
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;

        let mut data = container.output.clone();
        let truncated = match max_bytes {
            Some(limit) if data.len() > limit => {
                data.truncate(limit);
                true
            }
            _ => false,
        };
        Ok(CapturedOutput { data, truncated })
    }

    async fn remove_container(&self, container_id: &str, _force: bool) -> Result<()> {
        self.check_engine()?;
        if let Some(delay) = self.faults.remove_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.fail_remove {
            return Err(ProviderError::ContainerError(
                "removal of container is already in progress".to_string(),
            ));
        }

        let mut state = self.state();
        state
            .containers
            .remove(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        state.removed += 1;
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.check_engine()?;
        let state = self.state();
        Ok(state
            .containers
            .iter()
            .map(|(id, container)| ContainerSummary {
                id: id.clone(),
                name: container.config.name.clone(),
                state: if container.killed {
                    "exited".to_string()
                } else if container.started {
                    "running".to_string()
                } else {
                    "created".to_string()
                },
                language: container.config.labels.get(LANGUAGE_LABEL).cloned(),
                created_at: Some(container.created_at),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program() {
        let steps = parse_program("print hi\nsleep 5\nexit 3\noom\nraw line");
        assert_eq!(
            steps,
            vec![
                Step::Print("hi".to_string()),
                Step::Sleep(Duration::from_millis(5)),
                Step::Exit(3),
                Step::Oom,
                Step::Print("raw line".to_string()),
            ]
        );
    }
}
