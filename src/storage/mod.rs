//! In-memory storage: string space, hash directory, TTL expiry.
//!
//! [`engine::Store`] holds the data behind a two-layer locking scheme (outer
//! directory lock, per-hash inner locks). Expired entries vanish from reads
//! immediately via lazy deadline checks; [`expiry::Sweeper`] reclaims their
//! memory in the background.

pub mod engine;
pub mod expiry;

pub use engine::{Entry, SetCondition, Snapshot, Store};
pub use expiry::{start_sweeper, SweepConfig, Sweeper};
