// ABOUTME: Driver trait and shared workload types for sandbox backends
// ABOUTME: Defines the lifecycle and exec contract both backends implement

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::exec::{ExecCommand, ExecStream};

pub mod docker;
pub mod kubernetes;

pub use docker::DockerDriver;
pub use kubernetes::KubeDriver;

/// Fixed interval between readiness polls during create
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which backend a driver (and every sandbox it creates) talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LocalContainer,
    Kubernetes,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::LocalContainer => write!(f, "local_container"),
            BackendKind::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// Backend-specific reference to one running unit of execution.
///
/// Created by a driver's `create`, owned by the sandbox that wraps it, never
/// shared between sandboxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadHandle {
    /// A container on the local runtime
    Container { id: String },
    /// A pod scheduled on a cluster
    Pod { name: String, namespace: String },
}

/// Parameters for creating one workload
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub image: String,
    pub name: String,
    /// Boot command keeping the workload alive (for example `sleep infinity`)
    pub command: Option<ExecCommand>,
    /// Bound on the readiness poll, in seconds
    pub timeout_secs: u64,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: VolumeSource,
    pub container_path: String,
    pub readonly: bool,
}

/// Where a mounted volume comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    /// Directory on the host (bind mount / hostPath)
    HostPath(String),
    /// Scratch space living and dying with the workload
    EmptyDir,
    /// Named persistent claim (cluster backend only)
    Claim(String),
}

/// Observed workload state, unified across backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Running,
    Paused,
    Stopped,
    Succeeded,
    Failed,
    /// The status query itself failed; diagnostic value, never an error
    Unknown,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkloadStatus::Pending => "pending",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Paused => "paused",
            WorkloadStatus::Stopped => "stopped",
            WorkloadStatus::Succeeded => "succeeded",
            WorkloadStatus::Failed => "failed",
            WorkloadStatus::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Name plus observed status, as returned by list operations
#[derive(Debug, Clone)]
pub struct WorkloadSummary {
    pub name: String,
    pub status: WorkloadStatus,
}

/// Lifecycle and exec operations a sandbox backend must provide
#[async_trait]
pub trait Driver: Send + Sync {
    /// Which backend this driver talks to
    fn kind(&self) -> BackendKind;

    /// Handle addressing an existing workload by its canonical name
    fn workload_handle(&self, name: &str) -> WorkloadHandle;

    /// Create one workload and block until it is ready.
    ///
    /// Polls status once per second up to `spec.timeout_secs`. On timeout or
    /// any API failure after the workload exists, the half-created workload
    /// is deleted (best effort, failures logged) before the error is
    /// returned: exactly one workload exists on success, zero on any failure
    /// path.
    async fn create(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle>;

    /// Tear a workload down with immediate termination.
    ///
    /// Deleting a name the backend does not know is `NotFound`, not success.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Best-effort status query; backend failures degrade to `Unknown`
    async fn get_status(&self, name: &str) -> WorkloadStatus;

    /// Workloads this driver owns on its backend, with observed status
    async fn list(&self) -> Result<Vec<WorkloadSummary>>;

    /// Run a command and wait for it, returning combined stdout+stderr.
    ///
    /// A non-zero exit surfaces as `CommandFailure` carrying the combined
    /// output. Implemented by draining `exec_stream`, so both backends share
    /// one execution protocol.
    async fn exec(
        &self,
        handle: &WorkloadHandle,
        command: &ExecCommand,
        workdir: Option<&str>,
    ) -> Result<String> {
        let stream = self.exec_stream(handle, command, workdir).await?;
        stream.wait().await
    }

    /// Open a live event stream for a command.
    ///
    /// The stream always terminates with exactly one `ExitCode` record; a
    /// transport failure is delivered in-band as an `Error` record followed
    /// by a failure exit code, never as a raised error mid-consumption.
    async fn exec_stream(
        &self,
        handle: &WorkloadHandle,
        command: &ExecCommand,
        workdir: Option<&str>,
    ) -> Result<ExecStream>;
}
