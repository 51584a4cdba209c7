//! Background expiry sweeper.
//!
//! Lazy checks on the read path hide expired entries from observers, but a
//! key nobody touches again would sit in memory forever. The sweeper closes
//! that gap: on a fixed cadence it collects every entry past its deadline
//! and removes it under the write locks.
//!
//! Each tick runs in two phases: collect candidates under read locks, then
//! purge them in bounded batches, yielding to the scheduler between batches
//! so foreground commands never wait behind one long sweep. Deadlines are
//! re-checked under the write lock, so a key rewritten after collection
//! survives. A final pass runs when the shutdown signal arrives.

use crate::storage::engine::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Keys or fields removed per batch before yielding.
const SWEEP_BATCH: usize = 256;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Pause between sweeps.
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Handle to the running sweeper task.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Sweeper {
    /// Spawns the sweeper over `store`.
    pub fn start(store: Arc<Store>, config: SweepConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_loop(store, config, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signals the task to stop and waits for its final pass.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        info!("expiry sweeper stopped");
    }
}

async fn sweep_loop(store: Arc<Store>, config: SweepConfig, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = shutdown_rx.changed() => {
                // one last pass so shutdown leaves no freshly expired entries behind
                sweep_once(&store).await;
                return;
            }
        }
        sweep_once(&store).await;
    }
}

/// Collects expired entries, then purges them batch by batch.
async fn sweep_once(store: &Store) {
    let mut removed = 0u64;

    let keys = store.expired_keys();
    for batch in keys.chunks(SWEEP_BATCH) {
        removed += store.purge_keys(batch);
        tokio::task::yield_now().await;
    }

    for (hash, fields) in store.expired_fields() {
        for batch in fields.chunks(SWEEP_BATCH) {
            removed += store.purge_fields(&hash, batch);
            tokio::task::yield_now().await;
        }
    }

    if removed > 0 {
        debug!(removed, "swept expired entries");
    }
}

/// Starts a sweeper with the default one-second cadence.
pub fn start_sweeper(store: Arc<Store>) -> Sweeper {
    Sweeper::start(store, SweepConfig::default())
}
