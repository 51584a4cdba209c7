//! Client connection handling.
//!
//! One [`Connection`] per accepted socket, each on its own task. The
//! connection owns the read buffer and the write-ahead step: write commands
//! are appended to the log before dispatch.

pub mod handler;

pub use handler::{Connection, ConnectionError};
