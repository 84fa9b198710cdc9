//! Local file-based snapshot backend.
//!
//! Keeps `snapshot.json` and `snapshot.lock` in a `.stackplan` directory.
//! Snapshot writes go through a temporary file and a rename.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StackplanError, StateError};

use super::lock::{lock_missing, LockInfo, LOCK_EXPIRY_SECS};
use super::store::SnapshotStore;
use super::types::Snapshot;

/// Default state directory name.
pub const STATE_DIR: &str = ".stackplan";

/// Snapshot file name.
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Lock file name.
const LOCK_FILE: &str = "snapshot.lock";

/// Publish attempts before giving up on a lock file that keeps changing.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Local file-based snapshot store.
#[derive(Debug)]
pub struct LocalSnapshotStore {
    /// Base directory for snapshot files.
    base_dir: PathBuf,
    /// Path to the snapshot file.
    snapshot_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalSnapshotStore {
    /// Creates a new local store under `.stackplan` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                StackplanError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let snapshot_path = base_dir.join(SNAPSHOT_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            snapshot_path,
            lock_path,
        }
    }

    /// Gets the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::backend(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Path for a lease document before it is published.
    fn staging_path(&self, lock_id: &str) -> PathBuf {
        self.base_dir.join(format!("{LOCK_FILE}.{lock_id}"))
    }

    /// Reads the current lease, if any.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        read_lease(&self.lock_path).await
    }

    /// Publishes `lease` as the lock file unless one already exists.
    ///
    /// The document is written in full first and then hard-linked into place,
    /// so readers never see a partial lease and only one publisher can win.
    async fn publish_lease(&self, lease: &LockInfo) -> Result<bool> {
        let staged = self.staging_path(&lease.lock_id);
        write_synced(&staged, &lease.encode()?)
            .await
            .map_err(|e| lock_failed("stage lock file", &e))?;

        let linked = fs::hard_link(&staged, &self.lock_path).await;
        discard(&staged).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(lock_failed("publish lock file", &e).into()),
        }
    }

    /// Removes the lock file only if it still carries `lock_id`.
    ///
    /// The file is first renamed aside, which only one caller can do. A lease
    /// that turns out to belong to someone else is linked back into place.
    async fn withdraw_lease(&self, lock_id: &str) -> Result<bool> {
        let parked = self
            .base_dir
            .join(format!("{LOCK_FILE}.{}.parked", Uuid::new_v4().simple()));

        match fs::rename(&self.lock_path, &parked).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(lock_failed("move lock file", &e).into()),
        }

        let found = read_lease(&parked).await;
        let ours = matches!(&found, Ok(Some(lease)) if lease.lock_id == lock_id);

        if !ours {
            match fs::hard_link(&parked, &self.lock_path).await {
                Ok(()) => debug!("Lock file belonged to another run, restored"),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Lock file belonged to another run, already replaced");
                }
                Err(e) => warn!("Failed to restore lock file: {e}"),
            }
        }
        discard(&parked).await;

        found.map(|_| ours)
    }
}

/// Reads a lease document, `None` when the file is absent.
async fn read_lease(path: &Path) -> Result<Option<LockInfo>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(LockInfo::decode(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StateError::corrupted(format!("Failed to read lock file: {e}")).into()),
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Best-effort removal of a scratch file.
async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

fn lock_failed(action: &str, e: &std::io::Error) -> StateError {
    StateError::LockFailed {
        message: format!("Failed to {action}: {e}"),
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        if !self.snapshot_path.exists() {
            debug!("Snapshot file does not exist: {}", self.snapshot_path.display());
            return Ok(None);
        }

        info!("Loading snapshot from: {}", self.snapshot_path.display());

        let content = fs::read_to_string(&self.snapshot_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read snapshot file: {e}")))?;

        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse snapshot file: {e}")))?;
        snapshot.check_version()?;

        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_dir().await?;

        info!("Saving snapshot to: {}", self.snapshot_path.display());

        let content = serde_json::to_string_pretty(snapshot).map_err(|e| {
            StateError::serialization(format!("Failed to serialize snapshot: {e}"))
        })?;

        let temp_path = self.snapshot_path.with_extension("tmp");
        write_synced(&temp_path, content.as_bytes())
            .await
            .map_err(|e| StateError::backend(format!("Failed to write snapshot: {e}")))?;

        fs::rename(&temp_path, &self.snapshot_path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to rename snapshot file: {e}")))?;

        debug!("Snapshot saved successfully");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.snapshot_path.exists() {
            info!("Deleting snapshot file: {}", self.snapshot_path.display());
            fs::remove_file(&self.snapshot_path).await.map_err(|e| {
                StateError::backend(format!("Failed to delete snapshot file: {e}"))
            })?;
        }

        discard(&self.lock_path).await;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.snapshot_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;
        let lease = LockInfo::new(holder);

        for _ in 0..ACQUIRE_ATTEMPTS {
            if self.publish_lease(&lease).await? {
                info!(
                    "Acquired snapshot lock: {} (expires in {}s)",
                    lease.lock_id, LOCK_EXPIRY_SECS
                );
                return Ok(lease);
            }

            match self.read_lock_file().await? {
                Some(current) if !current.is_expired() => return Err(current.conflict().into()),
                Some(stale) => {
                    warn!(
                        "Clearing expired lock held by {} since {}",
                        stale.holder, stale.acquired_at
                    );
                    self.withdraw_lease(&stale.lock_id).await?;
                }
                None => debug!("Lock released while acquiring, retrying"),
            }
        }

        Err(StateError::LockFailed {
            message: String::from("lock file kept changing while acquiring"),
        }
        .into())
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let current = self
            .read_lock_file()
            .await?
            .ok_or_else(|| lock_missing(lock_id))?;
        if current.lock_id != lock_id {
            return Err(current.superseded(lock_id).into());
        }

        let renewed = current.renewed();
        let staged = self.staging_path(lock_id);
        write_synced(&staged, &renewed.encode()?)
            .await
            .map_err(|e| lock_failed("stage lock file", &e))?;
        fs::rename(&staged, &self.lock_path)
            .await
            .map_err(|e| lock_failed("replace lock file", &e))?;

        debug!("Renewed snapshot lock {lock_id} until {}", renewed.expires_at);
        Ok(renewed)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if self.withdraw_lease(lock_id).await? {
            info!("Released snapshot lock: {lock_id}");
        } else {
            debug!("Lock {lock_id} is not held, nothing to release");
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PropertyBag, ResourceKind, ResourceNode};
    use crate::provider::ProviderHandle;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalSnapshotStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalSnapshotStore::with_base_dir(temp_dir.path().join(STATE_DIR));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut snapshot = Snapshot::new("test-project", "dev");
        let net = ResourceNode {
            id: String::from("net"),
            kind: ResourceKind::Network,
            properties: PropertyBag::new(),
            dependencies: vec![],
            wiring: vec![],
        };
        snapshot.record(&net, ProviderHandle::new("net-1").with_output("vpc_id", "net-1"));
        store.save(&snapshot).await.expect("Failed to save snapshot");

        let loaded = store
            .load()
            .await
            .expect("Failed to load snapshot")
            .expect("Snapshot should exist");

        assert_eq!(loaded.project, "test-project");
        assert_eq!(loaded.environment, "dev");
        assert_eq!(
            loaded.get("net").and_then(|r| r.handle.output("vpc_id")),
            Some("net-1")
        );
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_version() {
        let (store, _temp) = create_test_store();

        let mut snapshot = Snapshot::new("test-project", "dev");
        snapshot.version = String::from("9.9");
        store.save(&snapshot).await.expect("Failed to save snapshot");

        let err = store.load().await.expect_err("version mismatch");
        assert!(matches!(
            err,
            StackplanError::State(StateError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_snapshot() {
        let (store, _temp) = create_test_store();

        store
            .save(&Snapshot::new("test-project", "dev"))
            .await
            .expect("Failed to save snapshot");
        assert!(store.exists().await.expect("exists check failed"));

        store.delete().await.expect("Failed to delete");
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let err = store.acquire_lock("holder-2").await.expect_err("locked");
        assert!(matches!(
            err,
            StackplanError::State(StateError::LockedByOther { holder, .. }) if holder == "holder-1"
        ));
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();

        store.acquire_lock("holder-1").await.expect("lock");
        store.release_lock("not-the-lock").await.expect("release");

        assert!(store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();

        plant_lease(&store, &stale_lease()).await;

        let lock = store.acquire_lock("holder-2").await.expect("take over");
        assert_eq!(lock.holder, "holder-2");
    }

    fn stale_lease() -> LockInfo {
        let mut stale = LockInfo::new("crashed-run");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        stale
    }

    async fn plant_lease(store: &LocalSnapshotStore, lease: &LockInfo) {
        store.ensure_dir().await.expect("state dir");
        fs::write(&store.lock_path, lease.encode().expect("encode"))
            .await
            .expect("write lock");
    }

    /// Races two stores over one directory and returns the winning lease.
    async fn race(dir: &Path) -> LockInfo {
        let a = LocalSnapshotStore::with_base_dir(dir);
        let b = LocalSnapshotStore::with_base_dir(dir);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.acquire_lock("run-a").await }),
            tokio::spawn(async move { b.acquire_lock("run-b").await }),
        );
        let results = [ra.expect("join run-a"), rb.expect("join run-b")];

        let winners: Vec<&LockInfo> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "exactly one run holds the lock: {results:?}");
        for result in &results {
            if let Err(e) = result {
                assert!(
                    matches!(e, StackplanError::State(StateError::LockedByOther { .. })),
                    "loser sees the winner: {e}"
                );
            }
        }
        winners[0].clone()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_one_winner() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dir = temp.path().join(STATE_DIR);
        let store = LocalSnapshotStore::with_base_dir(&dir);

        for _ in 0..50 {
            let winner = race(&dir).await;
            assert_eq!(store.get_lock_info().await.expect("lock info"), Some(winner.clone()));
            store.release_lock(&winner.lock_id).await.expect("release");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_takeover_of_expired_lock_has_one_winner() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dir = temp.path().join(STATE_DIR);
        let store = LocalSnapshotStore::with_base_dir(&dir);

        for _ in 0..20 {
            plant_lease(&store, &stale_lease()).await;
            let winner = race(&dir).await;
            assert_eq!(store.get_lock_info().await.expect("lock info"), Some(winner.clone()));
            store.release_lock(&winner.lock_id).await.expect("release");
        }
    }

    #[tokio::test]
    async fn test_renew_extends_held_lock() {
        let (store, _temp) = create_test_store();
        let mut lease = store.acquire_lock("holder-1").await.expect("lock");
        lease.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        plant_lease(&store, &lease).await;

        let renewed = store.renew_lock(&lease.lock_id).await.expect("renew");
        assert_eq!(renewed.lock_id, lease.lock_id);
        assert!(store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_renew_fails_after_takeover_or_release() {
        let (store, _temp) = create_test_store();
        let ours = store.acquire_lock("holder-1").await.expect("lock");

        let theirs = LockInfo::new("holder-2");
        plant_lease(&store, &theirs).await;
        let err = store.renew_lock(&ours.lock_id).await.expect_err("taken over");
        assert!(matches!(err, StackplanError::State(StateError::LockLost { .. })));

        // Releasing with a stale id leaves the new holder in place.
        store.release_lock(&ours.lock_id).await.expect("release");
        assert_eq!(store.get_lock_info().await.expect("lock info"), Some(theirs.clone()));

        store.release_lock(&theirs.lock_id).await.expect("release");
        let err = store.renew_lock(&theirs.lock_id).await.expect_err("released");
        assert!(matches!(err, StackplanError::State(StateError::LockLost { .. })));
    }

    #[tokio::test]
    async fn test_lock_leaves_no_scratch_files() {
        let (store, _temp) = create_test_store();
        let lock = store.acquire_lock("holder-1").await.expect("lock");
        store.renew_lock(&lock.lock_id).await.expect("renew");
        store.release_lock(&lock.lock_id).await.expect("release");

        let mut entries = fs::read_dir(store.base_dir()).await.expect("read dir");
        assert!(entries.next_entry().await.expect("entry").is_none());
    }
}
