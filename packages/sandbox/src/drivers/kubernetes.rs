// ABOUTME: Cluster driver scheduling sandbox pods through the Kubernetes API
// ABOUTME: Pod lifecycle with phase+Ready readiness and websocket-based exec

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, HostPathVolumeSource,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume, VolumeMount as PodVolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Status};
use kube::{
    api::{Api, AttachParams, DeleteParams, ListParams, PostParams},
    Client, Config,
};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::drivers::{
    BackendKind, Driver, VolumeSource, WorkloadHandle, WorkloadSpec, WorkloadStatus,
    WorkloadSummary, POLL_INTERVAL,
};
use crate::error::{Result, SandboxError};
use crate::exec::{ExecCommand, ExecEvent, ExecStream};

/// Label selecting pods owned by this driver
const MANAGED_LABEL: &str = "warden.sandbox/managed";

/// Name of the single sandbox container inside each pod
const SANDBOX_CONTAINER: &str = "sandbox";

pub struct KubeDriver {
    client: Client,
    namespace: String,
}

impl KubeDriver {
    /// Infer cluster config (in-cluster first, then kubeconfig) and build a client
    pub async fn connect() -> Result<Self> {
        Self::connect_with_namespace("default").await
    }

    pub async fn connect_with_namespace(namespace: &str) -> Result<Self> {
        let config = Config::infer().await.map_err(|e| {
            SandboxError::RemoteApi(format!("Unable to load cluster config: {}", e))
        })?;
        let client = Client::try_from(config).map_err(|e| {
            SandboxError::RemoteApi(format!("Unable to construct cluster client: {}", e))
        })?;
        Ok(Self::with_client(client, namespace))
    }

    /// Wrap an established client (tests, custom auth)
    pub fn with_client(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Translate a workload spec into a pod manifest
    fn build_pod(spec: &WorkloadSpec) -> Pod {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let ports: Vec<ContainerPort> = spec
            .ports
            .iter()
            .map(|port| ContainerPort {
                container_port: port.container_port as i32,
                ..Default::default()
            })
            .collect();

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        for (index, volume) in spec.volumes.iter().enumerate() {
            let volume_name = format!("sandbox-volume-{}", index);
            let source = match &volume.source {
                VolumeSource::HostPath(path) => Volume {
                    name: volume_name.clone(),
                    host_path: Some(HostPathVolumeSource {
                        path: path.clone(),
                        type_: None,
                    }),
                    ..Default::default()
                },
                VolumeSource::EmptyDir => Volume {
                    name: volume_name.clone(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                },
                VolumeSource::Claim(claim) => Volume {
                    name: volume_name.clone(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim.clone(),
                        read_only: Some(volume.readonly),
                    }),
                    ..Default::default()
                },
            };
            volumes.push(source);
            mounts.push(PodVolumeMount {
                name: volume_name,
                mount_path: volume.container_path.clone(),
                read_only: Some(volume.readonly),
                ..Default::default()
            });
        }

        Pod {
            metadata: ObjectMeta {
                name: Some(spec.name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: SANDBOX_CONTAINER.to_string(),
                    image: Some(spec.image.clone()),
                    command: spec.command.as_ref().map(|c| c.to_argv(None)),
                    ports: if ports.is_empty() { None } else { Some(ports) },
                    volume_mounts: if mounts.is_empty() { None } else { Some(mounts) },
                    tty: Some(true),
                    stdin: Some(true),
                    ..Default::default()
                }],
                volumes: if volumes.is_empty() {
                    None
                } else {
                    Some(volumes)
                },
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn convert_phase(phase: &str) -> WorkloadStatus {
        match phase {
            "Pending" => WorkloadStatus::Pending,
            "Running" => WorkloadStatus::Running,
            "Succeeded" => WorkloadStatus::Succeeded,
            "Failed" => WorkloadStatus::Failed,
            _ => WorkloadStatus::Unknown,
        }
    }

    /// Ready means phase Running and a Ready condition reporting True
    fn is_ready(pod: &Pod) -> bool {
        let Some(status) = &pod.status else {
            return false;
        };
        if status.phase.as_deref() != Some("Running") {
            return false;
        }
        status
            .conditions
            .as_ref()
            .map(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false)
    }

    /// Poll once per second until the pod is running and ready
    async fn wait_until_ready(&self, spec: &WorkloadSpec) -> Result<()> {
        let pods = self.pods();
        for _ in 0..spec.timeout_secs {
            let pod = pods
                .get(&spec.name)
                .await
                .map_err(|e| SandboxError::RemoteApi(e.to_string()))?;
            if Self::is_ready(&pod) {
                info!("Pod '{}' is running and ready", spec.name);
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
        let params = DeleteParams::default().grace_period(0);
        match self.pods().delete(name, &params).await {
            Ok(_) => info!("Pod '{}' removed after failed create", name),
            Err(e) => warn!("Failed to clean up pod '{}': {}", name, e),
        }
    }
}

#[async_trait]
impl Driver for KubeDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    fn workload_handle(&self, name: &str) -> WorkloadHandle {
        WorkloadHandle::Pod {
            name: name.to_string(),
            namespace: self.namespace.clone(),
        }
    }

    async fn create(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle> {
        info!(
            "Creating pod: {} (namespace {})",
            spec.name, self.namespace
        );
        let pods = self.pods();

        match pods.get_opt(&spec.name).await {
            Ok(Some(_)) => return Err(SandboxError::Conflict(spec.name.clone())),
            Ok(None) => {}
            Err(e) => return Err(SandboxError::RemoteApi(e.to_string())),
        }

        let pod = Self::build_pod(spec);
        match pods.create(&PostParams::default(), &pod).await {
            Ok(_) => {}
            Err(kube::Error::Api(response)) if response.code == 409 => {
                return Err(SandboxError::Conflict(spec.name.clone()))
            }
            Err(e) => return Err(SandboxError::RemoteApi(e.to_string())),
        }
        debug!("Created pod: {}", spec.name);

        match self.wait_until_ready(spec).await {
            Ok(()) => Ok(WorkloadHandle::Pod {
                name: spec.name.clone(),
                namespace: self.namespace.clone(),
            }),
            Err(e) => {
                self.cleanup(&spec.name).await;
                Err(e)
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        info!("Deleting pod: {}", name);

        let params = DeleteParams::default().grace_period(0);
        match self.pods().delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Err(SandboxError::NotFound(name.to_string()))
            }
            Err(e) => Err(SandboxError::RemoteApi(e.to_string())),
        }
    }

    async fn get_status(&self, name: &str) -> WorkloadStatus {
        match self.pods().get(name).await {
            Ok(pod) => pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                .map(Self::convert_phase)
                .unwrap_or(WorkloadStatus::Unknown),
            Err(e) => {
                debug!("Status query for '{}' failed: {}", name, e);
                WorkloadStatus::Unknown
            }
        }
    }

    async fn list(&self) -> Result<Vec<WorkloadSummary>> {
        let params = ListParams::default().labels(&format!("{}=true", MANAGED_LABEL));
        let pods = self
            .pods()
            .list(&params)
            .await
            .map_err(|e| SandboxError::RemoteApi(e.to_string()))?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| {
                let status = pod
                    .status
                    .as_ref()
                    .and_then(|status| status.phase.as_deref())
                    .map(Self::convert_phase)
                    .unwrap_or(WorkloadStatus::Unknown);
                Some(WorkloadSummary {
                    name: pod.metadata.name?,
                    status,
                })
            })
            .collect())
    }

    async fn exec_stream(
        &self,
        handle: &WorkloadHandle,
        command: &ExecCommand,
        workdir: Option<&str>,
    ) -> Result<ExecStream> {
        let WorkloadHandle::Pod { name, namespace } = handle else {
            return Err(SandboxError::Configuration(
                "cluster driver was handed a non-pod handle".to_string(),
            ));
        };
        if namespace != &self.namespace {
            return Err(SandboxError::Configuration(format!(
                "pod '{}' belongs to namespace '{}', driver is scoped to '{}'",
                name, namespace, self.namespace
            )));
        }

        debug!("Executing in pod {}: {}", name, command.display());

        let params = AttachParams::default()
            .container(SANDBOX_CONTAINER)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = self
            .pods()
            .exec(name, command.to_argv(workdir), &params)
            .await
            .map_err(|e| SandboxError::RemoteApi(e.to_string()))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(async move {
            let mut readers = Vec::new();
            if let Some(reader) = stdout {
                readers.push(tokio::spawn(forward_reader(reader, tx.clone(), false)));
            }
            if let Some(reader) = stderr {
                readers.push(tokio::spawn(forward_reader(reader, tx.clone(), true)));
            }
            for reader in readers {
                let _ = reader.await;
            }

            let status = match status {
                Some(status) => status.await,
                None => None,
            };
            if let Err(e) = attached.join().await {
                let _ = tx.send(ExecEvent::Error(e.to_string()));
                let _ = tx.send(ExecEvent::ExitCode(-1));
                return;
            }

            match exit_code_from_status(status) {
                Ok(code) => {
                    let _ = tx.send(ExecEvent::ExitCode(code));
                }
                Err(message) => {
                    let _ = tx.send(ExecEvent::Error(message));
                    let _ = tx.send(ExecEvent::ExitCode(-1));
                }
            }
        });

        Ok(ExecStream::new(rx, worker))
    }
}

/// Pump one attached pipe into the event channel until EOF
async fn forward_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<ExecEvent>, stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                let event = if stderr {
                    ExecEvent::Stderr(chunk)
                } else {
                    ExecEvent::Stdout(chunk)
                };
                if tx.send(event).is_err() {
                    break; // consumer stopped draining
                }
            }
            Err(e) => {
                // the transport failure itself surfaces through join()
                debug!("Attached pipe read failed: {}", e);
                break;
            }
        }
    }
}

/// Map the exec status frame to a process exit code.
///
/// The apiserver reports success, or a Failure whose `ExitCode` cause carries
/// the numeric code; anything else is a transport-level failure.
fn exit_code_from_status(status: Option<Status>) -> std::result::Result<i64, String> {
    let Some(status) = status else {
        return Err("exec finished without a status frame".to_string());
    };
    if status.status.as_deref() == Some("Success") {
        return Ok(0);
    }
    let code = status
        .details
        .as_ref()
        .and_then(|details| details.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|cause| cause.message.as_ref())
        .and_then(|message| message.parse::<i64>().ok());
    match code {
        Some(code) => Ok(code),
        None => Err(status
            .message
            .unwrap_or_else(|| "exec failed with no exit code".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{PortMapping, VolumeMount};
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};

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

    fn pod_with_status(phase: &str, ready: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: ready.map(|value| {
                    vec![PodCondition {
                        type_: "Ready".to_string(),
                        status: value.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_manifest_declares_port_and_host_path_volume() {
        let spec = spec_with(
            vec![PortMapping {
                host_port: 9000,
                container_port: 9000,
            }],
            vec![VolumeMount {
                source: VolumeSource::HostPath("/tmp/data".to_string()),
                container_path: "/workspace".to_string(),
                readonly: false,
            }],
        );

        let pod = KubeDriver::build_pod(&spec);
        let pod_spec = pod.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));

        let container = &pod_spec.containers[0];
        assert_eq!(container.name, "sandbox");
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 9000);

        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/workspace");

        let volumes = pod_spec.volumes.unwrap();
        assert_eq!(
            volumes[0].host_path.as_ref().unwrap().path,
            "/tmp/data"
        );
    }

    #[test]
    fn pod_manifest_maps_claim_and_empty_dir_sources() {
        let spec = spec_with(
            vec![],
            vec![
                VolumeMount {
                    source: VolumeSource::Claim("data-claim".to_string()),
                    container_path: "/data".to_string(),
                    readonly: true,
                },
                VolumeMount {
                    source: VolumeSource::EmptyDir,
                    container_path: "/scratch".to_string(),
                    readonly: false,
                },
            ],
        );

        let pod = KubeDriver::build_pod(&spec);
        let volumes = pod.spec.unwrap().volumes.unwrap();
        let claim = volumes[0].persistent_volume_claim.as_ref().unwrap();
        assert_eq!(claim.claim_name, "data-claim");
        assert_eq!(claim.read_only, Some(true));
        assert!(volumes[1].empty_dir.is_some());
    }

    #[test]
    fn readiness_requires_running_phase_and_ready_condition() {
        assert!(KubeDriver::is_ready(&pod_with_status("Running", Some("True"))));
        assert!(!KubeDriver::is_ready(&pod_with_status("Running", Some("False"))));
        assert!(!KubeDriver::is_ready(&pod_with_status("Running", None)));
        assert!(!KubeDriver::is_ready(&pod_with_status("Pending", Some("True"))));
    }

    #[test]
    fn phase_conversion_covers_pod_phases() {
        assert_eq!(KubeDriver::convert_phase("Running"), WorkloadStatus::Running);
        assert_eq!(KubeDriver::convert_phase("Pending"), WorkloadStatus::Pending);
        assert_eq!(
            KubeDriver::convert_phase("Succeeded"),
            WorkloadStatus::Succeeded
        );
        assert_eq!(KubeDriver::convert_phase("Failed"), WorkloadStatus::Failed);
        assert_eq!(KubeDriver::convert_phase("Evicted"), WorkloadStatus::Unknown);
    }

    #[test]
    fn exit_code_parses_success_and_failure_frames() {
        let success = Status {
            status: Some("Success".to_string()),
            ..Default::default()
        };
        assert_eq!(exit_code_from_status(Some(success)), Ok(0));

        let failure = Status {
            status: Some("Failure".to_string()),
            reason: Some("NonZeroExitCode".to_string()),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".to_string()),
                    message: Some("3".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(exit_code_from_status(Some(failure)), Ok(3));

        assert!(exit_code_from_status(None).is_err());
    }
}
