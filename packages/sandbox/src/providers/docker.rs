// ABOUTME: Docker provider implementation for ephemeral execution sandboxes
// ABOUTME: Uses bollard to create isolated containers, inject code archives, and collect output

use super::{
    CapturedOutput, ContainerConfig, ContainerSummary, ExitStatus, Provider, ProviderError,
    Result, LANGUAGE_LABEL, MANAGED_LABEL,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
        LogsOptions, RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
        WaitContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    models::{HostConfig, HostConfigLogConfig, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default timeout for image pulls
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

pub struct DockerProvider {
    client: Docker,
    /// Timeout for image pull operations
    pull_timeout: Duration,
}

/// Map a bollard error, keeping connectivity failures and 404s distinguishable
fn map_error(e: BollardError, wrap: fn(String) -> ProviderError) -> ProviderError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => ProviderError::NotFound(message),
        BollardError::IOError { .. }
        | BollardError::HyperLegacyError { .. }
        | BollardError::SocketNotFoundError(_)
        | BollardError::RequestTimeoutError => ProviderError::ConnectionError(e.to_string()),
        other => wrap(other.to_string()),
    }
}

impl DockerProvider {
    /// Create a new Docker provider with default pull timeout (10 minutes)
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(DEFAULT_PULL_TIMEOUT)
    }

    /// Create a new Docker provider with custom pull timeout
    ///
    /// Honors `DOCKER_HOST` and falls back to the platform's local socket.
    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self::with_client_and_timeout(client, timeout))
    }

    /// Create with a specific Docker connection and default timeout
    pub fn with_client(client: Docker) -> Self {
        Self::with_client_and_timeout(client, DEFAULT_PULL_TIMEOUT)
    }

    /// Create with a specific Docker connection and custom timeout
    pub fn with_client_and_timeout(client: Docker, timeout: Duration) -> Self {
        Self {
            client,
            pull_timeout: timeout,
        }
    }

    /// Convert our config to bollard config with the mandatory isolation settings
    fn to_bollard_config(config: &ContainerConfig) -> Config<String> {
        let mut labels = config.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let memory_bytes = i64::try_from(config.limits.memory_mb.saturating_mul(1024 * 1024))
            .unwrap_or(i64::MAX);

        // A single json-file that never rotates past the cap
        let log_config = config.limits.log_max_bytes.map(|bytes| HostConfigLogConfig {
            typ: Some("json-file".to_string()),
            config: Some(HashMap::from([
                ("max-size".to_string(), bytes.to_string()),
                ("max-file".to_string(), "1".to_string()),
            ])),
        });

        let host_config = HostConfig {
            memory: Some(memory_bytes),
            // Equal to memory: no swap beyond the ceiling
            memory_swap: Some(memory_bytes),
            nano_cpus: Some((config.limits.cpu_cores as f64 * 1_000_000_000.0) as i64),
            pids_limit: Some(config.limits.pids_limit),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            privileged: Some(false),
            binds: None,
            mounts: None,
            auto_remove: Some(false),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: Some(0),
            }),
            log_config,
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            cmd: Some(config.command.clone()),
            working_dir: Some(config.working_dir.clone()),
            labels: Some(labels),
            network_disabled: Some(true),
            tty: Some(false),
            open_stdin: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Whether the kernel OOM killer ended the container's process
    async fn was_oom_killed(&self, container_id: &str) -> bool {
        match self.client.inspect_container(container_id, None).await {
            Ok(inspect) => inspect
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                warn!("Failed to inspect container {}: {}", container_id, e);
                false
            }
        }
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(map_error(e, ProviderError::ImageError)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self.client.create_image(Some(options), None, None);

        // Apply timeout to the entire pull operation
        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            let mut last_status = String::new();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = &info.status {
                            if status != &last_status {
                                debug!("Pull status: {}", status);
                                last_status = status.clone();
                            }
                        }
                        if let Some(error) = info.error {
                            return Err(ProviderError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(map_error(e, |msg| {
                            ProviderError::ImageError(format!("Failed to pull image: {}", msg))
                        }));
                    }
                }
            }

            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        debug!("Creating container: {} from {}", config.name, config.image);

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(config))
            .await
            .map_err(|e| map_error(e, ProviderError::ContainerError))?;

        for warning in &container.warnings {
            warn!("Docker warning for {}: {}", config.name, warning);
        }

        Ok(container.id)
    }

    async fn upload_archive(
        &self,
        container_id: &str,
        dest_path: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        debug!(
            "Uploading {} byte archive to {}:{}",
            archive.len(),
            container_id,
            dest_path
        );

        let options = UploadToContainerOptions {
            path: dest_path.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container_id, Some(options), archive.into())
            .await
            .map_err(|e| map_error(e, ProviderError::TransferError))
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        debug!("Starting container: {}", container_id);

        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_error(e, ProviderError::ContainerError))
    }

    async fn wait_container(&self, container_id: &str) -> Result<ExitStatus> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.client.wait_container(container_id, Some(options));

        let code = match stream.next().await {
            Some(Ok(response)) => response.status_code,
            // bollard reports non-zero exits as errors carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(map_error(e, ProviderError::ContainerError)),
            None => {
                return Err(ProviderError::ContainerError(format!(
                    "Wait stream for {} ended without a status",
                    container_id
                )))
            }
        };

        let oom_killed = self.was_oom_killed(container_id).await;

        Ok(ExitStatus { code, oom_killed })
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        info!("Killing container: {}", container_id);

        let options = KillContainerOptions { signal: "SIGKILL" };

        match self.client.kill_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            // 409: the process already exited between the deadline and the kill
            Err(BollardError::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(map_error(e, ProviderError::ContainerError)),
        }
    }

    async fn collect_output(
        &self,
        container_id: &str,
        max_bytes: Option<usize>,
    ) -> Result<CapturedOutput> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut stream = self.client.logs(container_id, Some(options));
        let mut output = CapturedOutput::default();

        while let Some(result) = stream.next().await {
            let message = match result {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => message,
                Ok(LogOutput::StdIn { .. }) => continue,
                Err(e) => {
                    error!("Error reading logs for {}: {}", container_id, e);
                    return Err(map_error(e, ProviderError::ContainerError));
                }
            };

            output.data.extend_from_slice(&message);

            if let Some(limit) = max_bytes {
                if output.data.len() > limit {
                    output.data.truncate(limit);
                    output.truncated = true;
                    break;
                }
            }
        }

        Ok(output)
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        debug!("Removing container: {} (force: {})", container_id, force);

        let options = RemoveContainerOptions {
            force,
            v: true, // Remove anonymous volumes
            ..Default::default()
        };

        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| map_error(e, ProviderError::ContainerError))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| map_error(e, ProviderError::ContainerError))?;

        Ok(containers
            .into_iter()
            .filter_map(|container| {
                let id = container.id?;
                let name = container
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());

                Some(ContainerSummary {
                    name,
                    state: container.state.unwrap_or_else(|| "unknown".to_string()),
                    language: container
                        .labels
                        .and_then(|labels| labels.get(LANGUAGE_LABEL).cloned()),
                    created_at: container
                        .created
                        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
                    id,
                })
            })
            .collect())
    }
}
