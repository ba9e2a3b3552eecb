// ABOUTME: Shared command-execution channel used by both backend drivers
// ABOUTME: Shell normalization, workdir injection, and the streamed event protocol

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SandboxError};

/// Shell that interprets string commands inside a workload.
/// `sh` rather than `bash` so that minimal images work out of the box.
pub const SHELL: &str = "/bin/sh";

/// A command to run inside a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecCommand {
    /// A single line handed to the shell as `sh -c <line>`
    Shell(String),
    /// An explicit argument vector, spawned as-is
    Argv(Vec<String>),
}

impl From<&str> for ExecCommand {
    fn from(line: &str) -> Self {
        ExecCommand::Shell(line.to_string())
    }
}

impl From<String> for ExecCommand {
    fn from(line: String) -> Self {
        ExecCommand::Shell(line)
    }
}

impl From<Vec<String>> for ExecCommand {
    fn from(argv: Vec<String>) -> Self {
        ExecCommand::Argv(argv)
    }
}

impl ExecCommand {
    /// Normalize to the argv the backend will spawn.
    ///
    /// With a working directory the whole invocation is re-wrapped as
    /// `sh -c "cd <dir> && <argv>"` with every piece individually quoted, so
    /// embedded spaces and quotes survive the trip. Both drivers use this
    /// instead of their backend's native workdir facility, which keeps the
    /// behavior identical across backends.
    pub fn to_argv(&self, workdir: Option<&str>) -> Vec<String> {
        let argv = match self {
            ExecCommand::Shell(line) => {
                vec![SHELL.to_string(), "-c".to_string(), line.clone()]
            }
            ExecCommand::Argv(argv) => argv.clone(),
        };

        match workdir {
            None => argv,
            Some(dir) => vec![
                SHELL.to_string(),
                "-c".to_string(),
                format!("cd {} && {}", shell_quote(dir), shell_join(&argv)),
            ],
        }
    }

    /// Human-readable form for logs and error messages
    pub fn display(&self) -> String {
        match self {
            ExecCommand::Shell(line) => line.clone(),
            ExecCommand::Argv(argv) => argv.join(" "),
        }
    }
}

/// Quote one argument for POSIX sh
pub fn shell_quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Join arguments into a single shell-safe line
pub fn shell_join(argv: &[String]) -> String {
    let mut out = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&shell_quote(arg));
    }
    out
}

/// One record in a live execution stream.
///
/// Serializes externally tagged: `{"stdout": "..."}`, `{"stderr": "..."}`,
/// `{"error": "..."}`, `{"exit_code": 0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecEvent {
    /// Chunk of standard output
    Stdout(String),
    /// Chunk of standard error
    Stderr(String),
    /// Transport failure delivered in-band; at most one, followed by a failure exit code
    Error(String),
    /// Terminal record; exactly one per stream, always last
    ExitCode(i64),
}

/// Live ordered event stream from one remote command.
///
/// Single consumer; drain with [`recv`](Self::recv) until the `ExitCode`
/// record, or fold to completion with [`wait`](Self::wait). Dropping the
/// stream aborts the producer task, which closes the backend transport.
#[derive(Debug)]
pub struct ExecStream {
    receiver: mpsc::UnboundedReceiver<ExecEvent>,
    worker: JoinHandle<()>,
}

impl ExecStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<ExecEvent>, worker: JoinHandle<()>) -> Self {
        Self { receiver, worker }
    }

    /// Next event, or `None` once the stream is fully drained
    pub async fn recv(&mut self) -> Option<ExecEvent> {
        self.receiver.recv().await
    }

    /// Drain to completion, returning the combined stdout+stderr text.
    ///
    /// Output chunks are concatenated in arrival order and trimmed. An
    /// in-band `Error` record surfaces as `RemoteApi`; a non-zero exit code
    /// as `CommandFailure` carrying the combined output.
    pub async fn wait(mut self) -> Result<String> {
        let mut combined = String::new();
        let mut failure = None;
        let mut exit_code = None;

        while let Some(event) = self.recv().await {
            match event {
                ExecEvent::Stdout(chunk) | ExecEvent::Stderr(chunk) => combined.push_str(&chunk),
                ExecEvent::Error(message) => failure = Some(message),
                ExecEvent::ExitCode(code) => exit_code = Some(code),
            }
        }

        if let Some(message) = failure {
            return Err(SandboxError::RemoteApi(message));
        }
        let combined = combined.trim().to_string();
        match exit_code {
            Some(0) => Ok(combined),
            Some(code) => Err(SandboxError::CommandFailure {
                exit_code: code,
                output: combined,
            }),
            None => Err(SandboxError::RemoteApi(
                "execution stream ended without an exit code".to_string(),
            )),
        }
    }
}

impl Drop for ExecStream {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
