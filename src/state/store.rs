//! The storage seam every snapshot backend implements.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::Snapshot;
use crate::error::Result;

/// Durable home for a project's last-applied snapshot and its lease.
///
/// Lease operations must be atomic on the backend: `acquire_lock` succeeds for
/// exactly one of any number of concurrent callers, and `renew_lock` fails once
/// the lease has been released or taken over by another run.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Reads the snapshot, `None` before the first apply.
    async fn load(&self) -> Result<Option<Snapshot>>;

    /// Replaces the stored snapshot.
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Removes the snapshot and any lease.
    async fn delete(&self) -> Result<()>;

    /// Whether a snapshot has been written.
    async fn exists(&self) -> Result<bool>;

    /// Takes the lease for `holder`, clearing a lapsed one first.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Confirms `lock_id` still holds the lease and extends it.
    ///
    /// Fails with [`StateError::LockLost`](crate::error::StateError::LockLost)
    /// when another run owns the lease or none exists.
    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Drops the lease if `lock_id` still holds it; otherwise does nothing.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Current lease, lapsed or not.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Whether a live lease exists.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Backend name for logs and output.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl SnapshotStore for Box<dyn SnapshotStore> {
    async fn load(&self) -> Result<Option<Snapshot>> {
        (**self).load().await
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        (**self).save(snapshot).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).renew_lock(lock_id).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
