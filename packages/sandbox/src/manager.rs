// ABOUTME: Sandbox lifecycle manager mapping generic requests onto one resolved backend
// ABOUTME: Name canonicalization, parameter mapping, and create/destroy orchestration

use std::sync::Arc;
use tracing::info;

use crate::detect;
use crate::drivers::{
    BackendKind, Driver, PortMapping, VolumeMount, VolumeSource, WorkloadSpec, WorkloadStatus,
    WorkloadSummary,
};
use crate::error::{Result, SandboxError};
use crate::exec::ExecCommand;
use crate::sandbox::Sandbox;

/// Prefix every sandbox name carries before it reaches a backend
pub const NAME_PREFIX: &str = "sandbox-";

/// Container-side port a mapped sandbox port is bound to on the local runtime
const LOCAL_CONTAINER_PORT: u16 = 8080;

/// Container-side mount target for a mapped host directory
const MOUNT_TARGET: &str = "/workspace";

/// Default bound on the readiness poll
const DEFAULT_CREATE_TIMEOUT_SECS: u64 = 180;

/// Request to create a new sandbox
#[derive(Debug, Clone)]
pub struct CreateSandboxRequest {
    pub image: String,
    /// Sandbox name; the `sandbox-` prefix is added if absent
    pub name: String,
    /// Boot command keeping the workload alive (for example `sleep infinity`)
    pub command: Option<ExecCommand>,
    /// Generic port: bound host port on the local runtime, declared container
    /// port on a cluster
    pub sandbox_port: Option<u16>,
    /// Host directory mounted read-write at `/workspace`
    pub mount_path: Option<String>,
    /// Readiness bound in seconds; defaults to 180
    pub timeout_secs: Option<u64>,
}

/// Sandbox lifecycle manager.
///
/// Holds exactly one resolved driver for its entire lifetime and never mixes
/// backends across sandboxes.
pub struct SandboxManager {
    driver: Arc<dyn Driver>,
}

impl SandboxManager {
    /// Build a manager around an explicitly constructed driver
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Resolve the backend from the environment (cluster first, then local runtime)
    pub async fn detect() -> Result<Self> {
        Ok(Self {
            driver: detect::resolve_driver().await?,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.driver.kind()
    }

    /// Canonical form of a sandbox name; idempotent
    pub fn canonical_name(name: &str) -> String {
        if name.starts_with(NAME_PREFIX) {
            name.to_string()
        } else {
            format!("{}{}", NAME_PREFIX, name)
        }
    }

    /// Create a sandbox and block until its workload is ready.
    ///
    /// Fails with whatever the driver's create raised; there is no retry and
    /// no partially-created state. The caller gets a ready sandbox or an
    /// error.
    pub async fn create_sandbox(&self, request: CreateSandboxRequest) -> Result<Sandbox> {
        let name = Self::canonical_name(&request.name);
        let spec = self.to_workload_spec(&name, &request);
        info!("Creating sandbox '{}' on {}", name, self.backend());
        let handle = self.driver.create(&spec).await?;
        Ok(Sandbox::new(name, Arc::clone(&self.driver), handle))
    }

    /// Tear a sandbox down via its driver
    pub async fn destroy_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        let name = Self::canonical_name(sandbox.name());
        info!("Destroying sandbox '{}'", name);
        self.driver.delete(&name).await
    }

    /// Rebuild a handle for a workload that already exists on the backend
    pub async fn attach(&self, name: &str) -> Result<Sandbox> {
        let name = Self::canonical_name(name);
        if self.driver.get_status(&name).await == WorkloadStatus::Unknown {
            return Err(SandboxError::NotFound(name));
        }
        let handle = self.driver.workload_handle(&name);
        Ok(Sandbox::new(name, Arc::clone(&self.driver), handle))
    }

    /// Diagnostic status of a sandbox; degrades to `Unknown`, never fails
    pub async fn sandbox_status(&self, name: &str) -> WorkloadStatus {
        self.driver.get_status(&Self::canonical_name(name)).await
    }

    /// Sandboxes the driver currently owns on its backend
    pub async fn list_sandboxes(&self) -> Result<Vec<WorkloadSummary>> {
        self.driver.list().await
    }

    /// Map the generic request parameters onto the resolved backend
    fn to_workload_spec(&self, name: &str, request: &CreateSandboxRequest) -> WorkloadSpec {
        let ports = request
            .sandbox_port
            .map(|port| match self.backend() {
                // host port on the runtime side, bound to the fixed container port
                BackendKind::LocalContainer => PortMapping {
                    host_port: port,
                    container_port: LOCAL_CONTAINER_PORT,
                },
                // a pod just declares the container port
                BackendKind::Kubernetes => PortMapping {
                    host_port: port,
                    container_port: port,
                },
            })
            .into_iter()
            .collect();

        let volumes = request
            .mount_path
            .as_ref()
            .map(|path| VolumeMount {
                source: VolumeSource::HostPath(path.clone()),
                container_path: MOUNT_TARGET.to_string(),
                readonly: false,
            })
            .into_iter()
            .collect();

        WorkloadSpec {
            image: request.image.clone(),
            name: name.to_string(),
            command: request.command.clone(),
            timeout_secs: request.timeout_secs.unwrap_or(DEFAULT_CREATE_TIMEOUT_SECS),
            ports,
            volumes,
        }
    }
}
