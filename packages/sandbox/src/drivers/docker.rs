// ABOUTME: Local-runtime driver managing sandbox containers through the Docker daemon
// ABOUTME: Uses bollard for create/poll/delete and the exec API for command execution

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput,
        RemoveContainerOptions, StartContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::drivers::{
    BackendKind, Driver, VolumeSource, WorkloadHandle, WorkloadSpec, WorkloadStatus,
    WorkloadSummary, POLL_INTERVAL,
};
use crate::error::{Result, SandboxError};
use crate::exec::{ExecCommand, ExecEvent, ExecStream};

/// Label marking containers owned by this driver
const MANAGED_LABEL: &str = "warden.sandbox.managed";

pub struct DockerDriver {
    client: Docker,
}

impl DockerDriver {
    /// Connect to the local daemon and verify it responds to a ping
    pub async fn connect() -> Result<Self> {
        let client = Docker::connect_with_defaults().map_err(|e| {
            SandboxError::RemoteApi(format!("Unable to connect to Docker daemon: {}", e))
        })?;
        client.ping().await.map_err(|e| {
            SandboxError::RemoteApi(format!("Docker daemon did not answer ping: {}", e))
        })?;
        Ok(Self { client })
    }

    /// Wrap an already-established connection
    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    /// Translate a workload spec into a container config
    fn to_container_config(spec: &WorkloadSpec) -> Result<Config<String>> {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let container_port = format!("{}/tcp", port.container_port);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            let binding = vec![bollard::models::PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(port.host_port.to_string()),
            }];
            port_bindings.insert(container_port, Some(binding));
        }

        let mut binds = Vec::new();
        for volume in &spec.volumes {
            let host_dir = match &volume.source {
                VolumeSource::HostPath(dir) => dir.clone(),
                other => {
                    return Err(SandboxError::Configuration(format!(
                        "Volume source {:?} is not supported by the local runtime",
                        other
                    )))
                }
            };
            binds.push(format!(
                "{}:{}:{}",
                host_dir,
                volume.container_path,
                if volume.readonly { "ro" } else { "rw" }
            ));
        }

        Ok(Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.as_ref().map(|c| c.to_argv(None)),
            tty: Some(true),
            open_stdin: Some(true),
            labels: Some(labels),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(bollard::models::HostConfig {
                binds: if binds.is_empty() { None } else { Some(binds) },
                port_bindings: if port_bindings.is_empty() {
                    None
                } else {
                    Some(port_bindings)
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Convert a runtime state string to the unified status
    fn convert_status(state: &str) -> WorkloadStatus {
        match state.to_lowercase().as_str() {
            "created" => WorkloadStatus::Pending,
            "running" | "restarting" => WorkloadStatus::Running,
            "paused" => WorkloadStatus::Paused,
            "removing" | "exited" => WorkloadStatus::Stopped,
            "dead" => WorkloadStatus::Failed,
            _ => WorkloadStatus::Unknown,
        }
    }

    /// Start the container and poll once per second until it reports running
    async fn wait_until_running(&self, spec: &WorkloadSpec) -> Result<()> {
        self.client
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::RemoteApi(e.to_string()))?;

        for _ in 0..spec.timeout_secs {
            let inspect = self
                .client
                .inspect_container(&spec.name, None)
                .await
                .map_err(|e| SandboxError::RemoteApi(e.to_string()))?;
            let state = inspect
                .state
                .as_ref()
                .and_then(|s| s.status.as_ref())
                .map(|s| s.as_ref())
                .unwrap_or("unknown");
            if Self::convert_status(state) == WorkloadStatus::Running {
                info!("Container '{}' is running", spec.name);
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(SandboxError::Timeout {
            name: spec.name.clone(),
            seconds: spec.timeout_secs,
        })
    }

    /// Best-effort removal on the create failure path
    async fn cleanup(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.client.remove_container(name, Some(options)).await {
            Ok(()) => info!("Container '{}' removed after failed create", name),
            Err(e) => warn!("Failed to clean up container '{}': {}", name, e),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(SandboxError::RemoteApi(e.to_string())),
        }
    }

    /// Pull an image through the daemon, surfacing pull errors
    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let progress = result.map_err(|e| {
                SandboxError::RemoteApi(format!("Failed to pull image {}: {}", image, e))
            })?;
            if let Some(error) = progress.error {
                return Err(SandboxError::RemoteApi(format!(
                    "Failed to pull image {}: {}",
                    image, error
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for DockerDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalContainer
    }

    fn workload_handle(&self, name: &str) -> WorkloadHandle {
        // the daemon accepts a container name anywhere an id goes
        WorkloadHandle::Container {
            id: name.to_string(),
        }
    }

    async fn create(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle> {
        info!("Creating container: {}", spec.name);

        match self.client.inspect_container(&spec.name, None).await {
            Ok(_) => return Err(SandboxError::Conflict(spec.name.clone())),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(SandboxError::RemoteApi(e.to_string())),
        }

        if !self.image_exists(&spec.image).await? {
            info!("Pulling image: {}", spec.image);
            self.pull_image(&spec.image).await?;
        }

        let config = Self::to_container_config(spec)?;
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = match self.client.create_container(Some(options), config).await {
            Ok(response) => response,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => return Err(SandboxError::Conflict(spec.name.clone())),
            Err(e) => return Err(SandboxError::RemoteApi(e.to_string())),
        };
        debug!("Created container: {}", container.id);

        match self.wait_until_running(spec).await {
            Ok(()) => Ok(WorkloadHandle::Container { id: container.id }),
            Err(e) => {
                self.cleanup(&spec.name).await;
                Err(e)
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        info!("Removing container: {}", name);

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.client.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(SandboxError::NotFound(name.to_string())),
            Err(e) => Err(SandboxError::RemoteApi(e.to_string())),
        }
    }

    async fn get_status(&self, name: &str) -> WorkloadStatus {
        match self.client.inspect_container(name, None).await {
            Ok(inspect) => {
                let state = inspect
                    .state
                    .as_ref()
                    .and_then(|s| s.status.as_ref())
                    .map(|s| s.as_ref())
                    .unwrap_or("unknown");
                Self::convert_status(state)
            }
            Err(e) => {
                debug!("Status query for '{}' failed: {}", name, e);
                WorkloadStatus::Unknown
            }
        }
    }

    async fn list(&self) -> Result<Vec<WorkloadSummary>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        );

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| SandboxError::RemoteApi(e.to_string()))?;

        let mut summaries = Vec::new();
        for container in containers {
            let name = container
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|name| name.trim_start_matches('/').to_string())
                .or(container.id);
            let Some(name) = name else { continue };
            let status = container
                .state
                .as_deref()
                .map(Self::convert_status)
                .unwrap_or(WorkloadStatus::Unknown);
            summaries.push(WorkloadSummary { name, status });
        }
        Ok(summaries)
    }

    async fn exec_stream(
        &self,
        handle: &WorkloadHandle,
        command: &ExecCommand,
        workdir: Option<&str>,
    ) -> Result<ExecStream> {
        let WorkloadHandle::Container { id } = handle else {
            return Err(SandboxError::Configuration(
                "local runtime driver was handed a non-container handle".to_string(),
            ));
        };

        debug!("Executing in container {}: {}", id, command.display());

        let exec_config = CreateExecOptions {
            cmd: Some(command.to_argv(workdir)),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(id.as_str(), exec_config)
            .await
            .map_err(|e| SandboxError::RemoteApi(e.to_string()))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::RemoteApi(e.to_string()))?;

        let StartExecResults::Attached { mut output, .. } = start_result else {
            return Err(SandboxError::RemoteApi(
                "Exec was detached unexpectedly".to_string(),
            ));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let exec_id = exec.id.clone();

        let worker = tokio::spawn(async move {
            let mut failed = false;
            while let Some(msg) = output.next().await {
                let event = match msg {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        ExecEvent::Stdout(String::from_utf8_lossy(&message).to_string())
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        ExecEvent::Stderr(String::from_utf8_lossy(&message).to_string())
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        failed = true;
                        let _ = tx.send(ExecEvent::Error(e.to_string()));
                        break;
                    }
                };
                if tx.send(event).is_err() {
                    return; // consumer stopped draining
                }
            }

            let exit_code = if failed {
                -1
            } else {
                match client.inspect_exec(&exec_id).await {
                    // exit_code is only absent while the process still runs;
                    // the output stream has closed by now
                    Ok(inspect) => inspect.exit_code.unwrap_or(0),
                    Err(e) => {
                        let _ = tx.send(ExecEvent::Error(e.to_string()));
                        -1
                    }
                }
            };
            let _ = tx.send(ExecEvent::ExitCode(exit_code));
        });

        Ok(ExecStream::new(rx, worker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{PortMapping, VolumeMount};

    fn spec_with(ports: Vec<PortMapping>, volumes: Vec<VolumeMount>) -> WorkloadSpec {
        WorkloadSpec {
            image: "alpine:latest".to_string(),
            name: "sandbox-test".to_string(),
            command: Some(ExecCommand::from("sleep 300")),
            timeout_secs: 60,
            ports,
            volumes,
        }
    }

    #[test]
    fn status_conversion_covers_runtime_states() {
        assert_eq!(
            DockerDriver::convert_status("running"),
            WorkloadStatus::Running
        );
        assert_eq!(
            DockerDriver::convert_status("created"),
            WorkloadStatus::Pending
        );
        assert_eq!(
            DockerDriver::convert_status("exited"),
            WorkloadStatus::Stopped
        );
        assert_eq!(DockerDriver::convert_status("dead"), WorkloadStatus::Failed);
        assert_eq!(
            DockerDriver::convert_status("something-new"),
            WorkloadStatus::Unknown
        );
    }

    #[test]
    fn config_maps_ports_and_binds() {
        let spec = spec_with(
            vec![PortMapping {
                host_port: 9000,
                container_port: 8080,
            }],
            vec![VolumeMount {
                source: VolumeSource::HostPath("/tmp/data".to_string()),
                container_path: "/workspace".to_string(),
                readonly: false,
            }],
        );

        let config = DockerDriver::to_container_config(&spec).unwrap();
        assert_eq!(config.image, Some("alpine:latest".to_string()));
        assert_eq!(
            config.cmd,
            Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "sleep 300".to_string()
            ])
        );

        let host_config = config.host_config.unwrap();
        assert_eq!(
            host_config.binds,
            Some(vec!["/tmp/data:/workspace:rw".to_string()])
        );
        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings.get("8080/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding[0].host_port, Some("9000".to_string()));
    }

    #[test]
    fn unsupported_volume_source_fails_before_any_remote_call() {
        let spec = spec_with(
            vec![],
            vec![VolumeMount {
                source: VolumeSource::Claim("data-claim".to_string()),
                container_path: "/workspace".to_string(),
                readonly: false,
            }],
        );

        match DockerDriver::to_container_config(&spec) {
            Err(SandboxError::Configuration(message)) => {
                assert!(message.contains("not supported"), "message: {}", message)
            }
            other => panic!("expected Configuration error, got {:?}", other.map(|_| ())),
        }
    }
}
