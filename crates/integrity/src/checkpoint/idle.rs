// Background idle checkpointing for one shared session.
//
// Polls every `tick_ms`. Once edits are pending and the document has been
// quiet for `idle_checkpoint_after_ms`, runs a checkpoint through
// `SharedSession::try_checkpoint`, so a checkpoint the editor is already
// running is never doubled.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::engine::SharedSession;
use crate::scanner::DocumentStateProvider;

use super::scheduler::CheckpointResult;

pub struct IdleCheckpointLoop;

impl IdleCheckpointLoop {
    pub fn spawn<P>(
        session: SharedSession,
        provider: Arc<P>,
        config: SchedulerConfig,
    ) -> IdleCheckpointHandle
    where
        P: DocumentStateProvider + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (completed_tx, completed_rx) = watch::channel(0u64);

        let task = tokio::spawn(async move {
            idle_loop(session, provider, config, shutdown_rx, completed_tx).await;
        });

        IdleCheckpointHandle { task, shutdown_tx, completed_rx }
    }
}

/// Handle for the idle loop task. Dropping it leaves the task running until
/// the runtime shuts down; call `shutdown` to stop it.
pub struct IdleCheckpointHandle {
    task: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    completed_rx: watch::Receiver<u64>,
}

impl IdleCheckpointHandle {
    /// Number of checkpoints the loop has completed, updated live.
    pub fn completed(&self) -> watch::Receiver<u64> {
        self.completed_rx.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(error) = self.task.await {
            warn!(error = %error, "idle checkpoint loop ended abnormally");
        }
    }
}

async fn idle_loop<P>(
    session: SharedSession,
    provider: Arc<P>,
    config: SchedulerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    completed_tx: watch::Sender<u64>,
) where
    P: DocumentStateProvider + Send + Sync + 'static,
{
    let mut completed = 0u64;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.tick()) => {},
            _ = shutdown_rx.changed() => {
                debug!("idle checkpoint loop shutting down");
                break;
            }
        }

        let (due, doc_id) = {
            let guard = session.lock().await;
            (guard.is_checkpoint_due_at(Instant::now()), guard.doc_id())
        };
        if !due {
            continue;
        }

        // Scans are CPU-bound; keep them off the executor threads.
        let checkpoint = {
            let session = session.clone();
            let provider = Arc::clone(&provider);
            tokio::task::spawn_blocking(move || session.try_checkpoint(provider.as_ref())).await
        };

        match checkpoint {
            Ok(Ok(CheckpointResult::Completed(outcome))) => {
                completed += 1;
                let _ = completed_tx.send(completed);
                info!(
                    %doc_id,
                    kind = %outcome.kind,
                    mismatches = outcome.report.mismatches.len(),
                    "idle checkpoint completed"
                );
            }
            Ok(Ok(CheckpointResult::Deferred)) => {
                debug!(%doc_id, "idle checkpoint deferred");
            }
            Ok(Err(error)) => {
                warn!(%doc_id, error = %format!("{error:#}"), "idle checkpoint failed; will retry");
            }
            Err(error) => {
                warn!(%doc_id, error = %error, "idle checkpoint task aborted; will retry");
            }
        }
    }
}
