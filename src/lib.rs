//! # emberkv — in-memory key-value store with an append-only log
//!
//! A single-node, RESP-speaking key-value server: flat string keys, nested
//! field maps ("hashes"), per-key and per-field TTL expiry, and durability
//! through an append-only file replayed at startup.
//!
//! ## Architecture
//!
//! ```text
//! TCP listener ──> Connection ──> Executor ──> Store
//!                      │                         ▲
//!                      │ write commands          │ background
//!                      ▼                         │
//!                     Aof <── SyncTask       Sweeper
//! ```
//!
//! Each connection runs on its own task: parse a frame, append it to the
//! log if it writes, execute, reply. The sweeper reclaims expired entries;
//! the sync task fsyncs the log once a second. On boot the log is replayed
//! frame by frame into the executor, reproducing the state every
//! acknowledged write left behind.
//!
//! ## Modules
//!
//! - [`protocol`]: frame type, serializer, incremental parser
//! - [`storage`]: concurrent store with TTL and the expiry sweeper
//! - [`aof`]: append-only file — append, fsync loop, replay, rewrite
//! - [`commands`]: command dispatch and validation
//! - [`connection`]: per-client request loop and write-ahead logging
//! - [`server`]: listener, boot replay, graceful shutdown

pub mod aof;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use aof::{Aof, AofError, SyncTask};
pub use commands::Executor;
pub use connection::Connection;
pub use protocol::{Frame, FrameParser, ParseError};
pub use server::Server;
pub use storage::{Store, Sweeper};

/// Default listen port, same as Redis.
pub const DEFAULT_PORT: u16 = 6379;

/// Crate version, surfaced by INFO and `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
