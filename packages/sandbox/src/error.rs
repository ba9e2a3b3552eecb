// ABOUTME: Error types for sandbox lifecycle and command execution
// ABOUTME: One taxonomy shared by both backend drivers and the manager

use thiserror::Error;

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Bad or unsupported parameters, caught before any remote call is made
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A workload with the requested name already exists on the backend
    #[error("Workload already exists: {0}")]
    Conflict(String),

    /// Delete or attach against a workload the backend does not know
    #[error("Workload not found: {0}")]
    NotFound(String),

    /// Readiness was not reached within the polling bound
    #[error("Workload '{name}' did not become ready within {seconds}s")]
    Timeout { name: String, seconds: u64 },

    /// The backend API call failed for a reason other than the above
    #[error("Backend API error: {0}")]
    RemoteApi(String),

    /// A remote command exited non-zero; the message carries its combined output
    #[error("Command exited with code {exit_code}:\n{output}")]
    CommandFailure { exit_code: i64, output: String },
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        SandboxError::RemoteApi(err.to_string())
    }
}

impl From<kube::Error> for SandboxError {
    fn from(err: kube::Error) -> Self {
        SandboxError::RemoteApi(err.to_string())
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
