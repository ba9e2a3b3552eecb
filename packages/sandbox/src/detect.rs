// ABOUTME: Backend resolution probing the cluster first, then the local runtime
// ABOUTME: The first probe that succeeds supplies the driver; neither succeeding is fatal

use std::sync::Arc;
use tracing::{debug, info};

use crate::drivers::{DockerDriver, Driver, KubeDriver};
use crate::error::{Result, SandboxError};

/// Probe available backends and return the first driver that comes up.
///
/// Order is fixed: Kubernetes (config inference plus client construction),
/// then the local Docker daemon (socket connect plus ping). There is no
/// HTTP-backend fallback.
pub async fn resolve_driver() -> Result<Arc<dyn Driver>> {
    match KubeDriver::connect().await {
        Ok(driver) => {
            info!("Kubernetes sandbox backend ready");
            return Ok(Arc::new(driver));
        }
        Err(e) => debug!("Kubernetes backend unavailable: {}", e),
    }

    match DockerDriver::connect().await {
        Ok(driver) => {
            info!("Local Docker sandbox backend ready");
            return Ok(Arc::new(driver));
        }
        Err(e) => debug!("Docker backend unavailable: {}", e),
    }

    Err(SandboxError::Configuration(
        "No sandbox backend available: neither a cluster config nor a Docker daemon responded"
            .to_string(),
    ))
}
