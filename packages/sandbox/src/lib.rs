// ABOUTME: Sandbox provisioning and command execution over Docker or Kubernetes
// ABOUTME: One manager, one resolved backend driver, blocking and streamed exec

pub mod detect;
pub mod drivers;
pub mod error;
pub mod exec;
pub mod manager;
pub mod sandbox;

pub use drivers::{
    BackendKind, DockerDriver, Driver, KubeDriver, PortMapping, VolumeMount, VolumeSource,
    WorkloadHandle, WorkloadSpec, WorkloadStatus, WorkloadSummary,
};
pub use error::{Result, SandboxError};
pub use exec::{ExecCommand, ExecEvent, ExecStream};
pub use manager::{CreateSandboxRequest, SandboxManager, NAME_PREFIX};
pub use sandbox::Sandbox;
