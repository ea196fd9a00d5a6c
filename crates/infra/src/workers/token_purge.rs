use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::user_tokens::OneTimeTokenStore;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
    }
}

/// Periodically deletes consumed, revoked and expired one-time tokens.
#[derive(Debug)]
pub struct TokenPurgeWorker;

impl TokenPurgeWorker {
    /// Must be called within a tokio runtime. The first purge runs immediately.
    pub fn spawn(store: OneTimeTokenStore, interval: Duration) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = store.purge_finished().await {
                            warn!(error = %err, "token purge failed");
                        }
                    }
                }
            }
            debug!("token purge worker stopped");
        });

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}
