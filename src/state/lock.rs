//! Snapshot leases.
//!
//! A run holds a lease from before it reads the snapshot until after it has
//! written it back. Leases expire so that a crashed run does not block the
//! project forever; a live run renews its lease before it writes.
//!
//! Backends store a lease as a small JSON document and must create it with a
//! create-if-absent primitive, so two runs can never both believe they hold it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;

/// Lease lifetime in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// A lease on the snapshot of one project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Identifier of this lease; changes on every acquisition.
    pub lock_id: String,
    /// Host, process and run that took the lease.
    pub holder: String,
    /// When the lease was first taken.
    pub acquired_at: DateTime<Utc>,
    /// When the lease lapses unless renewed.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Starts a fresh lease for `holder`, falling back to a generated holder id.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder,
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Returns the same lease with its expiry pushed a full period ahead.
    #[must_use]
    pub fn renewed(&self) -> Self {
        Self {
            expires_at: Utc::now() + Duration::seconds(LOCK_EXPIRY_SECS),
            ..self.clone()
        }
    }

    /// Checks if the lease has lapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds left before the lease lapses, never negative.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Error reported to a run that finds this lease in its way.
    #[must_use]
    pub fn conflict(&self) -> StateError {
        StateError::LockedByOther {
            holder: self.holder.clone(),
            since: self.acquired_at.to_rfc3339(),
        }
    }

    /// Error reported to the run holding `lock_id` when it finds this lease instead.
    #[must_use]
    pub fn superseded(&self, lock_id: &str) -> StateError {
        StateError::LockLost {
            lock_id: lock_id.to_string(),
            message: format!("now held by {} since {}", self.holder, self.acquired_at.to_rfc3339()),
        }
    }

    /// Serializes the lease document.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))
    }

    /// Parses a lease document.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the bytes are not a lease.
    pub fn decode(bytes: &[u8]) -> Result<Self, StateError> {
        serde_json::from_slice(bytes)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock: {e}")))
    }
}

/// Error for a run whose lease vanished.
#[must_use]
pub fn lock_missing(lock_id: &str) -> StateError {
    StateError::LockLost {
        lock_id: lock_id.to_string(),
        message: String::from("lock was released"),
    }
}

/// Generates a holder id of the form `host-pid-xxxxxxxx`.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().into_owned());
    let run = Uuid::new_v4().simple().to_string();

    format!("{host}-{}-{}", std::process::id(), &run[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lease_is_live() {
        let lock = LockInfo::new("ci-runner");
        assert_eq!(lock.holder, "ci-runner");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 5);
    }

    #[test]
    fn test_empty_holder_gets_generated_id() {
        let lock = LockInfo::new("");
        assert!(lock.holder.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_lapsed_lease() {
        let mut lock = LockInfo::new("ci-runner");
        lock.expires_at = Utc::now() - Duration::seconds(1);

        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_renewal_keeps_identity() {
        let mut lock = LockInfo::new("ci-runner");
        lock.expires_at = Utc::now() - Duration::seconds(1);

        let renewed = lock.renewed();
        assert_eq!(renewed.lock_id, lock.lock_id);
        assert_eq!(renewed.acquired_at, lock.acquired_at);
        assert!(!renewed.is_expired());
    }

    #[test]
    fn test_document_round_trip_and_garbage() {
        let lock = LockInfo::new("ci-runner");
        let decoded = LockInfo::decode(&lock.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, lock);

        assert!(matches!(
            LockInfo::decode(b"not a lock"),
            Err(StateError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_holder_ids_differ_per_run() {
        let a = generate_holder_id();
        let b = generate_holder_id();

        assert_ne!(a, b);
        assert!(a.contains(&std::process::id().to_string()));
    }
}
