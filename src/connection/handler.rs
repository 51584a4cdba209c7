//! Per-connection request loop.
//!
//! Each accepted socket gets its own task running [`Connection::run`]:
//! accumulate bytes, parse one frame, classify it, log it if it writes,
//! execute, reply, repeat. Replies go out in request order — there is no
//! reordering within a connection.
//!
//! The write-ahead rule lives here: a write command reaches the append-only
//! log before it reaches the store, and if the log rejects it the command is
//! never dispatched — the client gets `-ERR internal error` and state stays
//! untouched.
//!
//! Malformed bytes are fatal for the connection (we cannot resynchronize a
//! tagged stream), command-level mistakes are just error replies, and a
//! shutdown signal ends the loop between requests.

use crate::aof::Aof;
use crate::commands::{is_write_command, Executor};
use crate::protocol::{Frame, FrameParser, ParseError};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Hard cap on buffered request bytes per connection.
const MAX_BUFFER: usize = 64 * 1024;

const INITIAL_BUFFER: usize = 4096;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),

    /// Peer closed the socket between requests.
    #[error("client disconnected")]
    Disconnected,

    /// Peer closed the socket mid-frame.
    #[error("connection closed mid-request")]
    UnexpectedEof,

    #[error("request exceeds {MAX_BUFFER} byte buffer limit")]
    BufferFull,
}

/// State for one client connection.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    parser: FrameParser,
    executor: Executor,
    aof: Arc<Aof>,
    shutdown: watch::Receiver<bool>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        executor: Executor,
        aof: Arc<Aof>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER),
            parser: FrameParser::new(),
            executor,
            aof,
            shutdown,
        }
    }

    /// Serves the connection until EOF, error, or shutdown.
    pub async fn run(mut self) {
        info!(client = %self.addr, "client connected");

        match self.serve().await {
            Ok(()) => debug!(client = %self.addr, "connection closed"),
            Err(ConnectionError::Disconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::Io(ref err))
                if err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(err) => warn!(client = %self.addr, error = %err, "connection terminated"),
        }
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.next_frame()? {
                self.handle(frame).await?;
            }

            if self.buffer.len() >= MAX_BUFFER {
                return Err(ConnectionError::BufferFull);
            }

            tokio::select! {
                result = self.stream.get_mut().read_buf(&mut self.buffer) => {
                    let n = result?;
                    if n == 0 {
                        return if self.buffer.is_empty() {
                            Err(ConnectionError::Disconnected)
                        } else {
                            Err(ConnectionError::UnexpectedEof)
                        };
                    }
                }
                _ = self.shutdown.changed() => {
                    // between requests; nothing in flight is truncated
                    return Ok(());
                }
            }
        }
    }

    /// Pops one complete frame off the buffer, or `None` to read more.
    fn next_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        match self.parser.parse(&self.buffer)? {
            Some((frame, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Logs write commands ahead of dispatch, executes, replies.
    async fn handle(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if let Some(name) = command_name(&frame) {
            if is_write_command(&name) {
                if let Err(err) = self.aof.append(&frame) {
                    error!(client = %self.addr, error = %err, "append-only log write failed");
                    // write-ahead principle: no log record, no mutation
                    return self.send(&Frame::error("ERR internal error")).await;
                }
            }
        }

        let reply = self.executor.execute(frame);
        self.send(&reply).await
    }

    async fn send(&mut self, reply: &Frame) -> Result<(), ConnectionError> {
        self.stream.write_all(&reply.serialize()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Uppercased command name of a well-formed request frame.
fn command_name(frame: &Frame) -> Option<String> {
    let items = frame.as_array()?;
    let name = items.first()?.as_bytes()?;
    std::str::from_utf8(name).ok().map(str::to_uppercase)
}
