//! Completion arbitration: races process exit, the wall-clock
//! watchdog, and caller cancellation into exactly one
//! [`CompletionOutcome`] per started unit.

use std::sync::Arc;
use std::time::Duration;

use sandbox::{CompletionOutcome, SandboxBackend};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Slack past the budget timeout before the watchdog fires. The
/// in-container CPU rlimit enforces the same budget and usually kills
/// the process first; the watchdog catches sleepers that burn no CPU.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Receiver side of one arbitrated run.
pub struct RunHandle {
    outcome: oneshot::Receiver<CompletionOutcome>,
}

impl RunHandle {
    /// Wait for the single terminal outcome.
    pub async fn outcome(self) -> CompletionOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| CompletionOutcome::BackendError("arbiter dropped".into()))
    }
}

/// Spawn the arbiter for a started unit.
///
/// The outcome is settled and delivered before any teardown request is
/// issued, so a slow or wedged daemon can delay cleanup but never the
/// caller's completion signal. Teardown itself is best-effort; with a
/// kill signal configured at creation the backend removes the unit on
/// its own.
pub fn spawn_arbiter<B: SandboxBackend>(
    backend: Arc<B>,
    unit_id: String,
    timeout: Duration,
    cancel: CancellationToken,
) -> RunHandle {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (outcome, force_stop) = tokio::select! {
            exit = backend.wait(&unit_id) => match exit {
                Ok(status) => (CompletionOutcome::Exited(status), false),
                Err(e) => (CompletionOutcome::BackendError(e.to_string()), true),
            },
            () = tokio::time::sleep(timeout + STOP_GRACE) => {
                (CompletionOutcome::TimedOut, true)
            }
            () = cancel.cancelled() => (CompletionOutcome::Cancelled, true),
        };

        info!(id = %unit_id, outcome = %outcome, "run settled");
        let _ = tx.send(outcome);

        if force_stop
            && let Err(e) = backend.stop(&unit_id, true).await
        {
            warn!(id = %unit_id, error = %e, "forced stop failed");
        }
    });
    RunHandle { outcome: rx }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use sandbox::{AttachStream, RunSpec, SandboxError};

    use super::*;

    struct FixedBackend {
        exit: i64,
        runs_for: Duration,
        stops: Mutex<Vec<String>>,
    }

    impl FixedBackend {
        fn new(exit: i64, runs_for: Duration) -> Arc<Self> {
            Arc::new(Self {
                exit,
                runs_for,
                stops: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SandboxBackend for FixedBackend {
        async fn create(&self, _spec: &RunSpec) -> sandbox::Result<String> {
            Ok("unit-0".into())
        }

        async fn attach(&self, _unit_id: &str) -> sandbox::Result<AttachStream> {
            Ok(Box::new(std::io::Cursor::new(Vec::new())))
        }

        async fn start(&self, _unit_id: &str) -> sandbox::Result<()> {
            Ok(())
        }

        async fn wait(&self, _unit_id: &str) -> sandbox::Result<i64> {
            tokio::time::sleep(self.runs_for).await;
            Ok(self.exit)
        }

        async fn stop(&self, unit_id: &str, immediate: bool) -> sandbox::Result<()> {
            self.stops
                .lock()
                .unwrap()
                .push(format!("{unit_id} immediate={immediate}"));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn natural_exit_wins_and_skips_teardown() {
        let backend = FixedBackend::new(7, Duration::from_secs(1));
        let handle = spawn_arbiter(
            Arc::clone(&backend),
            "unit-0".into(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        assert_eq!(handle.outcome().await, CompletionOutcome::Exited(7));
        assert!(backend.stops.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_fires_after_timeout_plus_grace() {
        let backend = FixedBackend::new(0, Duration::from_secs(3600));
        let handle = spawn_arbiter(
            Arc::clone(&backend),
            "unit-0".into(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        assert_eq!(handle.outcome().await, CompletionOutcome::TimedOut);
        // Teardown follows the settled outcome.
        tokio::task::yield_now().await;
        assert_eq!(
            backend.stops.lock().unwrap().as_slice(),
            ["unit-0 immediate=true"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exit_just_inside_the_grace_window_still_counts() {
        let backend = FixedBackend::new(0, Duration::from_secs(7));
        let handle = spawn_arbiter(
            Arc::clone(&backend),
            "unit-0".into(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        assert_eq!(handle.outcome().await, CompletionOutcome::Exited(0));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_preempts_the_run() {
        let backend = FixedBackend::new(0, Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let handle = spawn_arbiter(
            Arc::clone(&backend),
            "unit-0".into(),
            Duration::from_secs(5),
            cancel.clone(),
        );

        cancel.cancel();
        assert_eq!(handle.outcome().await, CompletionOutcome::Cancelled);
        tokio::task::yield_now().await;
        assert_eq!(
            backend.stops.lock().unwrap().as_slice(),
            ["unit-0 immediate=true"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backend_wait_failure_is_surfaced_and_torn_down() {
        struct BrokenWait(Mutex<Vec<String>>);

        #[async_trait]
        impl SandboxBackend for BrokenWait {
            async fn create(&self, _spec: &RunSpec) -> sandbox::Result<String> {
                Ok("unit-0".into())
            }
            async fn attach(&self, _unit_id: &str) -> sandbox::Result<AttachStream> {
                Ok(Box::new(std::io::Cursor::new(Vec::new())))
            }
            async fn start(&self, _unit_id: &str) -> sandbox::Result<()> {
                Ok(())
            }
            async fn wait(&self, _unit_id: &str) -> sandbox::Result<i64> {
                Err(SandboxError::WaitFailed("daemon restarted".into()))
            }
            async fn stop(&self, unit_id: &str, _immediate: bool) -> sandbox::Result<()> {
                self.0.lock().unwrap().push(unit_id.into());
                Ok(())
            }
        }

        let backend = Arc::new(BrokenWait(Mutex::new(Vec::new())));
        let handle = spawn_arbiter(
            Arc::clone(&backend),
            "unit-0".into(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        let outcome = handle.outcome().await;
        assert!(matches!(outcome, CompletionOutcome::BackendError(ref m) if m.contains("daemon restarted")));
        tokio::task::yield_now().await;
        assert_eq!(backend.0.lock().unwrap().as_slice(), ["unit-0"]);
    }
}
