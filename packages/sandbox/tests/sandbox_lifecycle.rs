// ABOUTME: Integration tests for the complete sandbox lifecycle against a real Docker daemon
// ABOUTME: Every test skips silently when no daemon is reachable

use std::sync::Arc;

use warden_sandbox::{
    CreateSandboxRequest, DockerDriver, Driver, ExecCommand, ExecEvent, SandboxError,
    SandboxManager, WorkloadStatus,
};

/// Manager over the local daemon, or None when Docker is unavailable
async fn docker_manager() -> Option<SandboxManager> {
    match DockerDriver::connect().await {
        Ok(driver) => Some(SandboxManager::new(Arc::new(driver))),
        Err(_) => None,
    }
}

fn request(name: &str) -> CreateSandboxRequest {
    CreateSandboxRequest {
        image: "alpine:latest".to_string(),
        name: name.to_string(),
        command: Some(ExecCommand::from("sleep 300")),
        sandbox_port: None,
        mount_path: None,
        timeout_secs: Some(60),
    }
}

/// Cleanup helper for failure paths; the assertions already ran
async fn destroy_quietly(manager: &SandboxManager, name: &str) {
    if let Ok(sandbox) = manager.attach(name).await {
        let _ = manager.destroy_sandbox(&sandbox).await;
    }
}

/// Full lifecycle: create → exec → stream → destroy → status Unknown
///
/// Verifies:
/// 1. The returned sandbox is running at return time, no further polling needed
/// 2. Blocking exec returns trimmed combined output
/// 3. The event stream delivers exactly one exit_code record, last
/// 4. After destroy the backend no longer knows the workload
#[tokio::test]
async fn test_complete_sandbox_lifecycle() {
    let Some(manager) = docker_manager().await else {
        println!("Skipping test: Docker not available");
        return;
    };

    let sandbox = manager
        .create_sandbox(request("lifecycle-test"))
        .await
        .expect("Failed to create sandbox");
    assert_eq!(sandbox.name(), "sandbox-lifecycle-test");
    assert_eq!(
        manager.sandbox_status("lifecycle-test").await,
        WorkloadStatus::Running
    );

    let output = sandbox
        .exec_command("echo hi")
        .await
        .expect("Failed to exec");
    assert_eq!(output, "hi");

    let mut stream = sandbox
        .exec_command_stream("echo one && echo two")
        .await
        .expect("Failed to open exec stream");
    let mut events = Vec::new();
    while let Some(event) = stream.recv().await {
        events.push(event);
    }
    let exit_codes: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, ExecEvent::ExitCode(_)))
        .collect();
    assert_eq!(exit_codes.len(), 1, "events: {:?}", events);
    assert_eq!(events.last(), Some(&ExecEvent::ExitCode(0)));

    manager
        .destroy_sandbox(&sandbox)
        .await
        .expect("Failed to destroy sandbox");
    assert_eq!(
        manager.sandbox_status("lifecycle-test").await,
        WorkloadStatus::Unknown
    );
}

/// A non-zero exit fails the blocking call and carries the combined output
#[tokio::test]
async fn test_exec_failure_carries_output() {
    let Some(manager) = docker_manager().await else {
        println!("Skipping test: Docker not available");
        return;
    };

    let sandbox = manager
        .create_sandbox(request("exec-failure-test"))
        .await
        .expect("Failed to create sandbox");

    match sandbox.exec_command("echo boom && exit 3").await {
        Err(SandboxError::CommandFailure { exit_code, output }) => {
            assert_eq!(exit_code, 3);
            assert!(output.contains("boom"), "output: {}", output);
        }
        other => panic!("expected CommandFailure, got {:?}", other),
    }

    destroy_quietly(&manager, "exec-failure-test").await;
}

/// Creating over an existing name fails with Conflict and leaves the
/// existing workload untouched
#[tokio::test]
async fn test_create_conflict_leaves_existing_untouched() {
    let Some(manager) = docker_manager().await else {
        println!("Skipping test: Docker not available");
        return;
    };

    let sandbox = manager
        .create_sandbox(request("conflict-test"))
        .await
        .expect("Failed to create sandbox");

    match manager.create_sandbox(request("conflict-test")).await {
        Err(SandboxError::Conflict(name)) => assert_eq!(name, "sandbox-conflict-test"),
        other => panic!("expected Conflict, got {:?}", other),
    }

    // the original is still there and still usable
    assert_eq!(
        manager.sandbox_status("conflict-test").await,
        WorkloadStatus::Running
    );
    let output = sandbox
        .exec_command("echo still-alive")
        .await
        .expect("Existing sandbox broken after conflict");
    assert_eq!(output, "still-alive");

    manager
        .destroy_sandbox(&sandbox)
        .await
        .expect("Failed to destroy sandbox");
}

/// When readiness is never observed within the bound, the half-created
/// workload is deleted before Timeout is returned
#[tokio::test]
async fn test_create_timeout_cleans_up() {
    let Some(manager) = docker_manager().await else {
        println!("Skipping test: Docker not available");
        return;
    };

    let mut req = request("timeout-test");
    // a zero bound forces the timeout branch regardless of container state
    req.timeout_secs = Some(0);

    match manager.create_sandbox(req).await {
        Err(SandboxError::Timeout { name, seconds }) => {
            assert_eq!(name, "sandbox-timeout-test");
            assert_eq!(seconds, 0);
        }
        other => panic!("expected Timeout, got {:?}", other),
    }

    assert_eq!(
        manager.sandbox_status("timeout-test").await,
        WorkloadStatus::Unknown
    );
}

/// A boot command that cannot start triggers cleanup on the API-failure path
#[tokio::test]
async fn test_failed_start_cleans_up() {
    let Some(manager) = docker_manager().await else {
        println!("Skipping test: Docker not available");
        return;
    };

    let mut req = request("bad-start-test");
    req.command = Some(ExecCommand::Argv(vec!["/nonexistent-binary".to_string()]));

    assert!(manager.create_sandbox(req).await.is_err());
    assert_eq!(
        manager.sandbox_status("bad-start-test").await,
        WorkloadStatus::Unknown
    );
}

/// Deleting a workload the backend does not know is NotFound, not success
#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let Ok(driver) = DockerDriver::connect().await else {
        println!("Skipping test: Docker not available");
        return;
    };

    match driver.delete("sandbox-never-created").await {
        Err(SandboxError::NotFound(name)) => assert_eq!(name, "sandbox-never-created"),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

/// A workdir containing a space round-trips without shell-injection damage
#[tokio::test]
async fn test_workdir_quoting_round_trip() {
    let Some(manager) = docker_manager().await else {
        println!("Skipping test: Docker not available");
        return;
    };

    let sandbox = manager
        .create_sandbox(request("workdir-test"))
        .await
        .expect("Failed to create sandbox");

    sandbox
        .exec_command("mkdir -p '/tmp/x y'")
        .await
        .expect("Failed to create directory");

    let output = sandbox
        .exec_command_in(r#"echo "a b" && pwd"#, "/tmp/x y")
        .await
        .expect("Failed to exec with workdir");
    assert_eq!(output, "a b\n/tmp/x y");

    manager
        .destroy_sandbox(&sandbox)
        .await
        .expect("Failed to destroy sandbox");
}

/// A mounted host directory is visible at /workspace inside the sandbox
#[tokio::test]
async fn test_mount_path_visible_in_workspace() {
    let Some(manager) = docker_manager().await else {
        println!("Skipping test: Docker not available");
        return;
    };

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("hello.txt"), "from host").expect("Failed to write file");

    let mut req = request("mount-test");
    req.mount_path = Some(dir.path().to_string_lossy().to_string());

    let sandbox = manager
        .create_sandbox(req)
        .await
        .expect("Failed to create sandbox");

    let output = sandbox
        .exec_command("cat /workspace/hello.txt")
        .await
        .expect("Failed to read mounted file");
    assert_eq!(output, "from host");

    manager
        .destroy_sandbox(&sandbox)
        .await
        .expect("Failed to destroy sandbox");
}
