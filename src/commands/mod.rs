//! Command dispatch.
//!
//! [`Executor`] maps request frames to store operations and builds reply
//! frames. [`is_write_command`] classifies commands for the connection
//! layer, which appends write frames to the log before dispatching them.

pub mod executor;

pub use executor::{is_write_command, Executor};
