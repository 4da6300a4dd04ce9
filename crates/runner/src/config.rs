use std::path::PathBuf;

use sandbox::ResourceBudget;
use sandbox_docker::{DockerBackend, LimitStrategy};

/// Server-side settings shared by every run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Docker daemon socket.
    pub socket_path: PathBuf,
    pub strategy: LimitStrategy,
    /// Directory staged workspaces are created under.
    pub staging_root: PathBuf,
    /// Owner of staged files and of the sandboxed process. Must not be
    /// root.
    pub runner_uid: u32,
    pub runner_gid: u32,
    /// Upper bounds caller-declared budgets are clamped to.
    pub caps: ResourceBudget,
}

impl RunnerConfig {
    /// Backend adapter wired to this config's daemon socket and limit
    /// strategy.
    pub fn backend(&self) -> DockerBackend {
        DockerBackend::new(self.socket_path.clone(), self.strategy)
    }

    /// Conservative caps for running code nobody has reviewed.
    pub fn default_caps() -> ResourceBudget {
        ResourceBudget {
            memory_bytes: 10 * 1024 * 1024,
            max_pids: 30,
            max_open_files: 512,
            core_dump_bytes: 0,
            memlock_bytes: 1024,
            max_file_bytes: 5 * 1024 * 1024,
            timeout_secs: 5,
            ..Default::default()
        }
    }
}
