//! TCP server: accept loop, boot-time replay, graceful shutdown.

use crate::aof::{Aof, SyncTask, DEFAULT_SYNC_INTERVAL};
use crate::commands::Executor;
use crate::connection::Connection;
use crate::storage::{Store, SweepConfig, Sweeper};
use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

/// A bound server with its history already replayed.
///
/// [`Server::bind`] performs the fallible startup work (open the log, bind
/// the port, replay) so callers can report failures before serving begins;
/// [`Server::run`] then serves until the supplied shutdown future resolves.
pub struct Server {
    listener: TcpListener,
    store: Arc<Store>,
    aof: Arc<Aof>,
    executor: Executor,
}

impl Server {
    /// Opens the append-only file, binds `addr`, and replays the log into a
    /// fresh store.
    ///
    /// Replay drives the same executor as live traffic but bypasses the
    /// connection layer, so nothing is re-appended to the log.
    pub async fn bind(addr: &str, aof_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let aof_path = aof_path.as_ref();
        let aof = Arc::new(
            Aof::open(aof_path)
                .with_context(|| format!("opening append-only file {}", aof_path.display()))?,
        );
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {}", addr))?;

        let store = Arc::new(Store::new());
        let executor = Executor::new(Arc::clone(&store));

        let replayed = aof.replay(|frame| {
            executor.execute(frame);
        })?;
        if replayed > 0 {
            info!(records = replayed, "replayed append-only file");
        }

        Ok(Self {
            listener,
            store,
            aof,
            executor,
        })
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `shutdown` resolves, then tears everything
    /// down in order: stop accepting, signal connections, wait for them,
    /// final expiry sweep, final log flush + fsync, close the log.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let sweeper = Sweeper::start(Arc::clone(&self.store), SweepConfig::default());
        let sync = SyncTask::start(Arc::clone(&self.aof), DEFAULT_SYNC_INTERVAL);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        info!(addr = %self.listener.local_addr()?, "listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let conn = Connection::new(
                                stream,
                                addr,
                                self.executor.clone(),
                                Arc::clone(&self.aof),
                                shutdown_rx.clone(),
                            );
                            connections.spawn(conn.run());
                        }
                        Err(err) => error!(error = %err, "failed to accept connection"),
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        drop(self.listener);
        let _ = shutdown_tx.send(true);
        while connections.join_next().await.is_some() {}

        sweeper.shutdown().await;
        sync.shutdown().await;
        self.aof.close()?;

        info!("server stopped");
        Ok(())
    }
}
