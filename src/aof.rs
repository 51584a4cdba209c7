//! Append-only file: durability and recovery.
//!
//! Every acknowledged write command lands in the log before it touches the
//! store. The record format is the wire codec itself — command frames
//! written back to back — so replay is just the parser pointed at the file.
//!
//! Durability policy is fsync-every-second: [`Aof::append`] only buffers,
//! and a background [`SyncTask`] flushes and syncs on a fixed cadence. A
//! clean shutdown flushes once more; a hard crash can lose at most one sync
//! interval of writes. This is deliberate — per-write fsync would gate every
//! SET on disk latency.
//!
//! The AOF lock is independent of the store's locks: neither is ever taken
//! while holding the other, which keeps replay and rewrite deadlock-free.

use crate::protocol::{Frame, FrameParser};
use crate::storage::{Snapshot, Store};
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Default log location next to the server binary.
pub const DEFAULT_AOF_PATH: &str = "database.aof";

/// Cadence of the background flush + fsync.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum AofError {
    /// The log was closed; every later operation fails with this.
    #[error("append-only file is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The append-only log.
///
/// Opened once at boot in append mode and kept for the process lifetime.
/// All operations go through one mutex; `None` inside it means closed.
#[derive(Debug)]
pub struct Aof {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl Aof {
    /// Opens (creating if needed) the log at `path` for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AofError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffers one command frame. Success means the bytes are in the write
    /// buffer, not yet on disk; the sync task makes them durable.
    pub fn append(&self, frame: &Frame) -> Result<(), AofError> {
        let mut guard = self.writer.lock().unwrap();
        let writer = guard.as_mut().ok_or(AofError::Closed)?;
        writer.write_all(&frame.serialize())?;
        Ok(())
    }

    /// Flushes the buffer and fsyncs the file.
    pub fn flush(&self) -> Result<(), AofError> {
        let mut guard = self.writer.lock().unwrap();
        let writer = guard.as_mut().ok_or(AofError::Closed)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Current size of the log on disk. Call [`Aof::flush`] first when
    /// buffered bytes must be included.
    pub fn size(&self) -> Result<u64, AofError> {
        let guard = self.writer.lock().unwrap();
        let writer = guard.as_ref().ok_or(AofError::Closed)?;
        Ok(writer.get_ref().metadata()?.len())
    }

    /// Streams every record from the start of the log into `apply`.
    ///
    /// A truncated or corrupt trailing record ends replay with a warning;
    /// records before it remain applied. Returns the number applied. New
    /// appends are unaffected — the append handle stays positioned at
    /// end-of-file.
    pub fn replay(&self, mut apply: impl FnMut(Frame)) -> Result<u64, AofError> {
        {
            let mut guard = self.writer.lock().unwrap();
            let writer = guard.as_mut().ok_or(AofError::Closed)?;
            writer.flush()?;
        }

        let mut data = Vec::new();
        File::open(&self.path)?.read_to_end(&mut data)?;

        let mut parser = FrameParser::new();
        let mut pos = 0;
        let mut applied = 0u64;
        while pos < data.len() {
            match parser.parse(&data[pos..]) {
                Ok(Some((frame, used))) => {
                    apply(frame);
                    pos += used;
                    applied += 1;
                }
                Ok(None) => {
                    warn!(offset = pos, "append-only file ends mid-record, tail dropped");
                    break;
                }
                Err(err) => {
                    warn!(offset = pos, error = %err, "corrupt record in append-only file, tail dropped");
                    break;
                }
            }
        }
        Ok(applied)
    }

    /// Compacts the log to a minimal sequence reproducing the store's live
    /// state, without stopping writers.
    ///
    /// Records the current log size, takes a point-in-time snapshot of the
    /// store (engine locks only), and emits one SET (+ EXPIRE) per string
    /// key and one HSET per hash field into `<path>.tmp` — all without the
    /// log lock, so appends keep flowing. Then, under the lock, the bytes
    /// appended since the recorded offset are copied verbatim behind the
    /// compacted state, the temp file is fsynced and renamed over the live
    /// path, and the append handle reopens. Gap records replayed over the
    /// snapshot are idempotent, so the overlap is harmless.
    pub fn rewrite(&self, store: &Store) -> Result<(), AofError> {
        let offset = {
            let mut guard = self.writer.lock().unwrap();
            let writer = guard.as_mut().ok_or(AofError::Closed)?;
            writer.flush()?;
            writer.get_ref().metadata()?.len()
        };

        let snapshot = store.snapshot();

        let tmp_path = tmp_path(&self.path);
        let mut tmp = BufWriter::new(File::create(&tmp_path)?);
        emit_snapshot(&mut tmp, &snapshot)?;
        tmp.flush()?;
        let mut tmp = tmp.into_inner().map_err(|e| e.into_error())?;

        let mut guard = self.writer.lock().unwrap();
        let writer = guard.as_mut().ok_or(AofError::Closed)?;
        writer.flush()?;

        let mut live = File::open(&self.path)?;
        live.seek(SeekFrom::Start(offset))?;
        let drained = io::copy(&mut live, &mut tmp)?;

        tmp.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *guard = Some(BufWriter::new(file));

        info!(
            keys = snapshot.strings.len(),
            hashes = snapshot.hashes.len(),
            drained_bytes = drained,
            "append-only file rewritten"
        );
        Ok(())
    }

    /// Final flush + fsync, then closes the file. Idempotent; every other
    /// operation afterwards returns [`AofError::Closed`].
    pub fn close(&self) -> Result<(), AofError> {
        let mut guard = self.writer.lock().unwrap();
        let mut writer = match guard.take() {
            Some(writer) => writer,
            None => return Ok(()),
        };
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

fn emit_snapshot(out: &mut impl Write, snapshot: &Snapshot) -> io::Result<()> {
    for (key, value, ttl) in &snapshot.strings {
        let set = Frame::array(vec![
            Frame::bulk(Bytes::from_static(b"SET")),
            Frame::Bulk(key.clone()),
            Frame::Bulk(value.clone()),
        ]);
        out.write_all(&set.serialize())?;

        if let Some(left) = ttl {
            let expire = Frame::array(vec![
                Frame::bulk(Bytes::from_static(b"EXPIRE")),
                Frame::Bulk(key.clone()),
                Frame::bulk(Bytes::from(ceil_secs(*left).to_string())),
            ]);
            out.write_all(&expire.serialize())?;
        }
    }

    for (hash, fields) in &snapshot.hashes {
        for (field, value, ttl) in fields {
            let mut parts = vec![
                Frame::bulk(Bytes::from_static(b"HSET")),
                Frame::Bulk(hash.clone()),
                Frame::Bulk(field.clone()),
                Frame::Bulk(value.clone()),
            ];
            if let Some(left) = ttl {
                parts.push(Frame::bulk(Bytes::from(ceil_secs(*left).to_string())));
            }
            out.write_all(&Frame::array(parts).serialize())?;
        }
    }
    Ok(())
}

/// Rounds a remaining TTL up to whole seconds so compaction never shortens
/// a deadline. Entries already at the boundary get one second of grace,
/// within the sweeper's drift tolerance.
fn ceil_secs(left: Duration) -> u64 {
    let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
    secs.max(1)
}

/// Handle to the background flush/fsync task.
#[derive(Debug)]
pub struct SyncTask {
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl SyncTask {
    /// Spawns the sync loop over `aof`.
    pub fn start(aof: Arc<Aof>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sync_loop(aof, interval, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signals the task to stop and waits for its final flush.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        info!("append-only file sync task stopped");
    }
}

async fn sync_loop(aof: Arc<Aof>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {
                if let Err(err) = aof.flush() {
                    error!(error = %err, "final append-only file flush failed");
                }
                return;
            }
        }
        match aof.flush() {
            Ok(()) => debug!("append-only file synced"),
            Err(AofError::Closed) => return,
            Err(err) => error!(error = %err, "append-only file sync failed"),
        }
    }
}
