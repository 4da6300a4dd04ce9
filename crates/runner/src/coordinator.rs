//! End-to-end run orchestration: catalog lookup, workspace staging,
//! and per-phase execution against the sandbox backend.

use std::path::Path;
use std::sync::Arc;

use sandbox::{
    CompletionOutcome, OutputSink, ResourceBudget, RunSpec, SandboxBackend, StreamKind, demux,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arbiter::spawn_arbiter;
use crate::catalog::{Catalog, Phase, Processor};
use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::relay::relay_stream;
use crate::stage::{SourceFile, stage};

/// Buffer between the demultiplexer and each relay.
const PIPE_CAPACITY: usize = 64 * 1024;

/// One caller request: a catalog triple, the files to stage, and the
/// caller's declared resource budget.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub language: String,
    pub processor: String,
    pub task: String,
    pub files: Vec<SourceFile>,
    pub budget: ResourceBudget,
}

pub struct RunCoordinator<B> {
    backend: Arc<B>,
    catalog: Catalog,
    config: RunnerConfig,
}

impl<B: SandboxBackend> RunCoordinator<B> {
    pub fn new(backend: B, catalog: Catalog, config: RunnerConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            catalog,
            config,
        }
    }

    /// Execute one request end to end.
    ///
    /// The compile phase, when the task has one, runs first and
    /// short-circuits everything else unless it exits 0. Both phases
    /// share the staged workspace, so compile artifacts are visible to
    /// the run phase. The workspace is removed when this returns.
    pub async fn run<S>(
        &self,
        request: &RunRequest,
        sink: S,
        cancel: CancellationToken,
    ) -> RunnerResult<CompletionOutcome>
    where
        S: OutputSink + 'static,
    {
        let (_, processor, task) =
            self.catalog
                .lookup(&request.language, &request.processor, &request.task)?;
        let budget = request.budget.clamped_to(&self.config.caps);
        let workspace = stage(
            &self.config.staging_root,
            self.config.runner_uid,
            self.config.runner_gid,
            &request.files,
        )
        .map_err(|e| RunnerError::Stage(e.to_string()))?;

        let sink = Arc::new(Mutex::new(sink));
        if let Some(compile) = &task.compile {
            let outcome = self
                .execute_phase(processor, compile, workspace.path(), budget, &sink, &cancel)
                .await?;
            if outcome != CompletionOutcome::Exited(0) {
                info!(outcome = %outcome, "compile phase did not succeed, skipping run phase");
                return Ok(outcome);
            }
        }

        match &task.run {
            Some(run) => {
                self.execute_phase(processor, run, workspace.path(), budget, &sink, &cancel)
                    .await
            }
            None => Ok(CompletionOutcome::Exited(0)),
        }
    }

    /// Drive one phase through the full unit lifecycle:
    /// create, attach, start, then relay output until both streams end
    /// and the arbiter settles the outcome.
    async fn execute_phase<S>(
        &self,
        processor: &Processor,
        phase: &Phase,
        workspace: &Path,
        budget: ResourceBudget,
        sink: &Arc<Mutex<S>>,
        cancel: &CancellationToken,
    ) -> RunnerResult<CompletionOutcome>
    where
        S: OutputSink + 'static,
    {
        let spec = RunSpec {
            image: processor.image.clone(),
            shell_cmd: phase.shell_command(),
            uid: self.config.runner_uid,
            gid: self.config.runner_gid,
            workspace_dir: workspace.to_path_buf(),
            budget,
        };
        debug!(image = %spec.image, cmd = %spec.shell_cmd, "phase starting");

        let unit_id = self.backend.create(&spec).await?;

        // Attach before start so no output can precede the reader.
        let combined = match self.backend.attach(&unit_id).await {
            Ok(stream) => stream,
            Err(e) => {
                self.kill_silently(&unit_id).await;
                return Err(e.into());
            }
        };

        let (stdout_w, stdout_r) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_w, stderr_r) = tokio::io::duplex(PIPE_CAPACITY);
        let demux_task = tokio::spawn(demux::demux(combined, stdout_w, stderr_w));

        if let Err(e) = self.backend.start(&unit_id).await {
            demux_task.abort();
            self.kill_silently(&unit_id).await;
            return Err(e.into());
        }

        let handle = spawn_arbiter(
            Arc::clone(&self.backend),
            unit_id.clone(),
            budget.timeout(),
            cancel.clone(),
        );

        // Both relays run to EOF (unit dead, writers shut down) or to
        // cancellation; only then is the settled outcome collected.
        let (stdout_done, stderr_done) = tokio::join!(
            relay_stream(stdout_r, StreamKind::Stdout, Arc::clone(sink), cancel.clone()),
            relay_stream(stderr_r, StreamKind::Stderr, Arc::clone(sink), cancel.clone()),
        );

        let outcome = handle.outcome().await;

        // After both relays returned the demultiplexer has either
        // finished or is blocked writing to a dropped pipe.
        demux_task.abort();
        let demux_result = demux_task.await;

        stdout_done.map_err(RunnerError::Relay)?;
        stderr_done.map_err(RunnerError::Relay)?;

        if let Ok(Err(e)) = demux_result {
            // A torn-down unit may truncate its stream mid-frame; only
            // an otherwise clean run makes that worth surfacing.
            if matches!(outcome, CompletionOutcome::Exited(_)) && !cancel.is_cancelled() {
                return Err(RunnerError::Relay(std::io::Error::other(e)));
            }
            debug!(id = %unit_id, error = %e, "output stream ended mid-teardown");
        }

        Ok(outcome)
    }

    async fn kill_silently(&self, unit_id: &str) {
        if let Err(e) = self.backend.stop(unit_id, true).await {
            warn!(id = %unit_id, error = %e, "cleanup stop failed");
        }
    }
}
