// ABOUTME: Command-line entry point for creating, driving, and destroying sandboxes
// ABOUTME: Thin plumbing over warden-sandbox; the backend is autodetected at startup

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use warden_sandbox::{CreateSandboxRequest, ExecEvent, SandboxManager};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Ephemeral sandboxes on Docker or Kubernetes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sandbox and wait until it is ready
    Create {
        /// Sandbox name (the sandbox- prefix is added if missing)
        name: String,
        /// Image to boot
        #[arg(long)]
        image: String,
        /// Boot command keeping the workload alive
        #[arg(long, default_value = "sleep infinity")]
        command: String,
        /// Sandbox port (host port locally, container port on a cluster)
        #[arg(long)]
        port: Option<u16>,
        /// Host directory mounted read-write at /workspace
        #[arg(long)]
        mount: Option<String>,
        /// Seconds to wait for readiness
        #[arg(long, default_value = "180")]
        timeout: u64,
    },
    /// Run a command in a running sandbox and print its combined output
    Exec {
        name: String,
        command: String,
        /// Working directory inside the workload
        #[arg(long)]
        workdir: Option<String>,
        /// Stream output live instead of waiting for completion
        #[arg(long)]
        stream: bool,
    },
    /// Destroy a sandbox
    Destroy { name: String },
    /// Show the backend's view of a sandbox
    Status { name: String },
    /// List sandboxes on the resolved backend
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let manager = SandboxManager::detect().await?;

    match cli.command {
        Commands::Create {
            name,
            image,
            command,
            port,
            mount,
            timeout,
        } => {
            let request = CreateSandboxRequest {
                image,
                name,
                command: Some(command.into()),
                sandbox_port: port,
                mount_path: mount,
                timeout_secs: Some(timeout),
            };
            let sandbox = manager.create_sandbox(request).await?;
            println!("{} ready on {}", sandbox.name(), sandbox.backend());
        }
        Commands::Exec {
            name,
            command,
            workdir,
            stream,
        } => {
            let sandbox = manager.attach(&name).await?;
            if stream {
                let mut events = match &workdir {
                    Some(dir) => sandbox.exec_command_stream_in(command, dir).await?,
                    None => sandbox.exec_command_stream(command).await?,
                };
                let mut exit_code = 0i64;
                while let Some(event) = events.recv().await {
                    match event {
                        ExecEvent::Stdout(chunk) => print!("{}", chunk),
                        ExecEvent::Stderr(chunk) => eprint!("{}", chunk),
                        ExecEvent::Error(message) => eprintln!("error: {}", message),
                        ExecEvent::ExitCode(code) => exit_code = code,
                    }
                }
                if exit_code != 0 {
                    std::process::exit(exit_code.clamp(1, 255) as i32);
                }
            } else {
                let output = match &workdir {
                    Some(dir) => sandbox.exec_command_in(command, dir).await?,
                    None => sandbox.exec_command(command).await?,
                };
                println!("{}", output);
            }
        }
        Commands::Destroy { name } => {
            let sandbox = manager.attach(&name).await?;
            manager.destroy_sandbox(&sandbox).await?;
            println!("{} destroyed", sandbox.name());
        }
        Commands::Status { name } => {
            println!("{}", manager.sandbox_status(&name).await);
        }
        Commands::List => {
            for summary in manager.list_sandboxes().await? {
                println!("{}\t{}", summary.name, summary.status);
            }
        }
    }

    Ok(())
}
