use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::types::RunSpec;

/// Combined multiplexed attach stream; framing is described in
/// [`crate::demux`].
pub type AttachStream = Box<dyn AsyncRead + Send + Unpin>;

/// One isolation backend (e.g. the Docker Engine).
///
/// An execution unit is owned exclusively by its backend adapter for
/// its lifetime; the only lifecycle call issued from outside the
/// normal sequence is the completion arbiter's forced [`stop`].
///
/// Create/attach/start failures abort the run before any output is
/// produced and are never retried — retrying untrusted-code execution
/// is a caller decision.
///
/// [`stop`]: SandboxBackend::stop
#[async_trait]
pub trait SandboxBackend: Send + Sync + 'static {
    /// Create a new execution unit for `spec`. Returns the unit id.
    async fn create(&self, spec: &RunSpec) -> Result<String>;

    /// Attach to the unit's combined output stream. Called before
    /// [`start`](SandboxBackend::start) so no early output is lost.
    async fn attach(&self, unit_id: &str) -> Result<AttachStream>;

    /// Start a created unit.
    async fn start(&self, unit_id: &str) -> Result<()>;

    /// Block until the unit exits; returns its exit status.
    async fn wait(&self, unit_id: &str) -> Result<i64>;

    /// Force-stop the unit with a hard kill. `immediate` skips any
    /// backend-side grace delay.
    async fn stop(&self, unit_id: &str, immediate: bool) -> Result<()>;
}
