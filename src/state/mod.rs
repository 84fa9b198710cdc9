//! Snapshot storage module.
//!
//! This module persists the last-known-applied snapshot of a topology and
//! enforces single-writer access through an expiring lock.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalSnapshotStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use s3::S3SnapshotStore;
pub use store::SnapshotStore;
pub use types::{
    HistoryEntry, ResourceRecord, RunOperation, Snapshot, MAX_HISTORY, SNAPSHOT_VERSION,
};
