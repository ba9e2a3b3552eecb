// ABOUTME: Backend-agnostic sandbox handle binding a name, a driver, and a workload
// ABOUTME: Exec calls delegate to the driver that created the workload

use std::fmt;
use std::sync::Arc;

use crate::drivers::{BackendKind, Driver, WorkloadHandle};
use crate::error::Result;
use crate::exec::{ExecCommand, ExecStream};

/// A live sandbox: canonical name plus the workload it wraps.
///
/// The backend kind is fixed by the driver that built the workload and never
/// changes afterwards; every exec call routes through that driver.
pub struct Sandbox {
    name: String,
    driver: Arc<dyn Driver>,
    handle: WorkloadHandle,
}

impl Sandbox {
    pub(crate) fn new(name: String, driver: Arc<dyn Driver>, handle: WorkloadHandle) -> Self {
        Self {
            name,
            driver,
            handle,
        }
    }

    /// Canonical sandbox name (carries the `sandbox-` prefix)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> BackendKind {
        self.driver.kind()
    }

    /// Backend handle for the owned workload
    pub fn handle(&self) -> &WorkloadHandle {
        &self.handle
    }

    /// Run a command and wait for its combined output
    pub async fn exec_command(&self, command: impl Into<ExecCommand>) -> Result<String> {
        self.driver.exec(&self.handle, &command.into(), None).await
    }

    /// Run a command in a working directory inside the workload
    pub async fn exec_command_in(
        &self,
        command: impl Into<ExecCommand>,
        workdir: &str,
    ) -> Result<String> {
        self.driver
            .exec(&self.handle, &command.into(), Some(workdir))
            .await
    }

    /// Run a command, streaming output live until the exit-code record
    pub async fn exec_command_stream(
        &self,
        command: impl Into<ExecCommand>,
    ) -> Result<ExecStream> {
        self.driver
            .exec_stream(&self.handle, &command.into(), None)
            .await
    }

    /// Streaming variant of [`exec_command_in`](Self::exec_command_in)
    pub async fn exec_command_stream_in(
        &self,
        command: impl Into<ExecCommand>,
        workdir: &str,
    ) -> Result<ExecStream> {
        self.driver
            .exec_stream(&self.handle, &command.into(), Some(workdir))
            .await
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("name", &self.name)
            .field("backend", &self.backend())
            .field("handle", &self.handle)
            .finish()
    }
}
