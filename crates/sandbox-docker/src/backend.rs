use std::io;

use async_trait::async_trait;
use sandbox::{AttachStream, RunSpec, SandboxBackend, SandboxError};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::client::DockerClient;
use crate::limits::LimitStrategy;

/// Fixed path the staged workspace is bind-mounted at inside the
/// container; also the container's working directory.
pub const WORKSPACE_MOUNT: &str = "/home/sandbox";

/// Engine-side stop timeout baked into the container config, seconds.
/// Irrelevant in practice since the stop signal is already SIGKILL.
const STOP_TIMEOUT_SECS: u64 = 3;

pub struct DockerBackend {
    client: DockerClient,
    strategy: LimitStrategy,
}

impl DockerBackend {
    pub fn new(socket_path: impl Into<std::path::PathBuf>, strategy: LimitStrategy) -> Self {
        Self {
            client: DockerClient::new(socket_path),
            strategy,
        }
    }
}

/// True when the daemon itself is unreachable, as opposed to a request
/// against a reachable daemon failing.
fn is_unavailable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused | io::ErrorKind::PermissionDenied
    )
}

fn build_create_body(spec: &RunSpec, strategy: LimitStrategy) -> Value {
    let mut host_config = Map::new();
    host_config.insert("AutoRemove".into(), json!(true));
    host_config.insert("ReadonlyRootfs".into(), json!(true));
    host_config.insert("Privileged".into(), json!(false));
    host_config.insert(
        "Binds".into(),
        json!([format!("{}:{}", spec.workspace_dir.display(), WORKSPACE_MOUNT)]),
    );
    strategy.apply(&spec.budget, &mut host_config);

    json!({
        "Image": spec.image,
        "Cmd": ["/bin/sh", "-c", spec.shell_cmd],
        "User": format!("{}:{}", spec.uid, spec.gid),
        "WorkingDir": WORKSPACE_MOUNT,
        "StopSignal": "SIGKILL",
        "StopTimeout": STOP_TIMEOUT_SECS,
        "AttachStdout": true,
        "AttachStderr": true,
        "HostConfig": Value::Object(host_config),
    })
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    async fn create(&self, spec: &RunSpec) -> sandbox::Result<String> {
        let body = build_create_body(spec, self.strategy);
        let resp = self
            .client
            .request("POST", "/containers/create", Some(&body))
            .await
            .map_err(|e| {
                if is_unavailable(&e) {
                    SandboxError::BackendUnavailable(e.to_string())
                } else {
                    SandboxError::CreationFailed(e.to_string())
                }
            })?;
        if resp.status != 201 {
            return Err(SandboxError::CreationFailed(resp.error_message()));
        }

        let unit_id = resp
            .json()
            .ok()
            .and_then(|v| v.get("Id").and_then(Value::as_str).map(str::to_owned))
            .ok_or_else(|| SandboxError::CreationFailed("missing container id".into()))?;

        info!(id = %unit_id, image = %spec.image, "container created");
        Ok(unit_id)
    }

    async fn attach(&self, unit_id: &str) -> sandbox::Result<AttachStream> {
        let stream = self
            .client
            .upgrade(
                "POST",
                &format!("/containers/{unit_id}/attach?stream=1&stdout=1&stderr=1"),
            )
            .await
            .map_err(|e| SandboxError::AttachFailed(e.to_string()))?;

        debug!(id = %unit_id, "attached");
        Ok(Box::new(stream))
    }

    async fn start(&self, unit_id: &str) -> sandbox::Result<()> {
        let resp = self
            .client
            .request("POST", &format!("/containers/{unit_id}/start"), None)
            .await
            .map_err(|e| SandboxError::StartFailed(e.to_string()))?;
        // 304: already started.
        if resp.status != 204 && resp.status != 304 {
            return Err(SandboxError::StartFailed(resp.error_message()));
        }

        info!(id = %unit_id, "container started");
        Ok(())
    }

    async fn wait(&self, unit_id: &str) -> sandbox::Result<i64> {
        let resp = self
            .client
            .request("POST", &format!("/containers/{unit_id}/wait"), None)
            .await
            .map_err(|e| SandboxError::WaitFailed(e.to_string()))?;
        if resp.status != 200 {
            return Err(SandboxError::WaitFailed(resp.error_message()));
        }

        let status = resp
            .json()
            .ok()
            .and_then(|v| v.get("StatusCode").and_then(Value::as_i64))
            .ok_or_else(|| SandboxError::WaitFailed("missing exit status".into()))?;

        info!(id = %unit_id, status, "container exited");
        Ok(status)
    }

    async fn stop(&self, unit_id: &str, immediate: bool) -> sandbox::Result<()> {
        let path = if immediate {
            format!("/containers/{unit_id}/kill?signal=SIGKILL")
        } else {
            format!("/containers/{unit_id}/stop?t=0&signal=SIGKILL")
        };
        let resp = self
            .client
            .request("POST", &path, None)
            .await
            .map_err(|e| SandboxError::StopFailed(e.to_string()))?;
        // 304: already stopped. 404/409: auto-removal already won the race.
        if !matches!(resp.status, 204 | 304 | 404 | 409) {
            return Err(SandboxError::StopFailed(resp.error_message()));
        }

        info!(id = %unit_id, immediate, "container stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sandbox::ResourceBudget;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    use super::*;

    fn spec() -> RunSpec {
        RunSpec {
            image: "alpine:latest".into(),
            shell_cmd: "sh main.sh".into(),
            uid: 1000,
            gid: 1000,
            workspace_dir: "/tmp/stage-1".into(),
            budget: ResourceBudget {
                memory_bytes: 10 * 1024 * 1024,
                max_open_files: 512,
                max_pids: 30,
                memlock_bytes: 1024,
                max_file_bytes: 5 * 1024 * 1024,
                timeout_secs: 5,
                ..Default::default()
            },
        }
    }

    #[test]
    fn create_body_runs_as_caller_uid_gid() {
        let body = build_create_body(&spec(), LimitStrategy::Rlimits);
        assert_eq!(body["User"], "1000:1000");
    }

    #[test]
    fn create_body_locks_down_the_container() {
        let body = build_create_body(&spec(), LimitStrategy::Rlimits);
        let host_config = &body["HostConfig"];
        assert_eq!(host_config["ReadonlyRootfs"], true);
        assert_eq!(host_config["Privileged"], false);
        assert_eq!(host_config["AutoRemove"], true);
        assert_eq!(
            host_config["Binds"],
            json!(["/tmp/stage-1:/home/sandbox"])
        );
    }

    #[test]
    fn create_body_uses_shell_indirection() {
        let body = build_create_body(&spec(), LimitStrategy::Rlimits);
        assert_eq!(body["Cmd"], json!(["/bin/sh", "-c", "sh main.sh"]));
        assert_eq!(body["WorkingDir"], WORKSPACE_MOUNT);
        assert_eq!(body["StopSignal"], "SIGKILL");
    }

    #[test]
    fn create_body_applies_limit_strategy() {
        let body = build_create_body(&spec(), LimitStrategy::Rlimits);
        assert!(body["HostConfig"]["Ulimits"].is_array());

        let body = build_create_body(&spec(), LimitStrategy::Cgroups);
        assert!(body["HostConfig"].get("Ulimits").is_none());
        assert_eq!(body["HostConfig"]["PidsLimit"], 30);
    }

    #[tokio::test]
    async fn create_extracts_container_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(
                    b"HTTP/1.1 201 Created\r\nContent-Length: 15\r\n\r\n{\"Id\":\"abc123\"}",
                )
                .await
                .unwrap();
        });

        let backend = DockerBackend::new(&path, LimitStrategy::Rlimits);
        let id = backend.create(&spec()).await.unwrap();
        assert_eq!(id, "abc123");
    }

    #[tokio::test]
    async fn create_surfaces_daemon_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 28\r\n\r\n{\"message\":\"no such image\"}\n",
                )
                .await
                .unwrap();
        });

        let backend = DockerBackend::new(&path, LimitStrategy::Rlimits);
        let err = backend.create(&spec()).await.unwrap_err();
        assert!(matches!(err, SandboxError::CreationFailed(ref m) if m.contains("no such image")));
    }

    #[tokio::test]
    async fn unreachable_daemon_is_backend_unavailable() {
        let backend = DockerBackend::new("/nonexistent/docker.sock", LimitStrategy::Rlimits);
        let err = backend.create(&spec()).await.unwrap_err();
        assert!(matches!(err, SandboxError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn stop_tolerates_auto_removal_race() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\n\r\n{}")
                .await
                .unwrap();
        });

        let backend = DockerBackend::new(&path, LimitStrategy::Rlimits);
        assert!(backend.stop("gone", true).await.is_ok());
    }
}
