use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::ResourceBudget;

/// Immutable description of one sandboxed execution unit.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Image/runtime identifier understood by the backend.
    pub image: String,
    /// Shell command, invoked as `/bin/sh -c <cmd>`. Must already be
    /// safely composed by the caller; the backend does not re-escape it.
    pub shell_cmd: String,
    /// Non-root owner the sandboxed process runs as.
    pub uid: u32,
    pub gid: u32,
    /// Host path of the staged workspace, bind-mounted as the unit's
    /// only writable directory and its working directory.
    pub workspace_dir: PathBuf,
    pub budget: ResourceBudget,
}

/// Logical output stream of the sandboxed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// One piece of process output. Chunks of the same kind are delivered
/// in produced order; no ordering holds between the two kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub kind: StreamKind,
    pub payload: Bytes,
}

/// Terminal classification of a run. Exactly one value is produced per
/// started unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The process exited on its own with this status.
    Exited(i64),
    /// The watchdog fired before the process exited.
    TimedOut,
    /// The caller cancelled the run.
    Cancelled,
    /// The backend failed while the run was in flight.
    BackendError(String),
}

impl std::fmt::Display for CompletionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited ({code})"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::BackendError(e) => write!(f, "backend error ({e})"),
        }
    }
}

/// Caller-facing destination for output chunks.
///
/// Implementations are not required to tolerate concurrent writers;
/// the relay serializes all deliveries through one lock.
#[async_trait]
pub trait OutputSink: Send {
    async fn send(&mut self, chunk: OutputChunk) -> std::io::Result<()>;
}
