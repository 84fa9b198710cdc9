//! S3-based snapshot backend.
//!
//! Stores `snapshot.json` and `snapshot.lock` under a key prefix in an S3 (or
//! compatible) bucket so a team can share one snapshot. The lock object is
//! only ever created with a conditional put, so the bucket arbitrates between
//! concurrent runs.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{lock_missing, LockInfo, LOCK_EXPIRY_SECS};
use super::store::SnapshotStore;
use super::types::Snapshot;

/// Snapshot object key suffix.
const SNAPSHOT_KEY: &str = "snapshot.json";

/// Lock object key suffix.
const LOCK_KEY: &str = "snapshot.lock";

/// Conditional puts before giving up on a lock object that keeps changing.
const ACQUIRE_ATTEMPTS: usize = 3;

/// S3-based snapshot store.
#[derive(Debug)]
pub struct S3SnapshotStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
}

impl S3SnapshotStore {
    /// Creates a new S3 snapshot store from the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a new S3 snapshot store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the full S3 key for a file.
    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    /// Gets an object body and its `ETag`.
    async fn get_object(&self, key: &str) -> Result<Option<(String, Option<String>)>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let e_tag = response.e_tag().map(str::to_string);
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::backend(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StateError::corrupted(format!("Invalid UTF-8 in S3 object: {e}")))?;

                Ok(Some((content, e_tag)))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::backend(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    /// Puts an object to S3, replacing any existing one.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::backend(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::backend(format!("S3 delete error: {e}")))?;

        Ok(())
    }

    /// Checks if an object exists in S3.
    async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::backend(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }

    /// Reads the current lease with the `ETag` it was stored under.
    async fn read_lock(&self) -> Result<Option<(LockInfo, Option<String>)>> {
        let Some((content, e_tag)) = self.get_object(&self.key(LOCK_KEY)).await? else {
            return Ok(None);
        };
        Ok(Some((LockInfo::decode(content.as_bytes())?, e_tag)))
    }

    /// Writes `lease` as the lock object under a precondition.
    ///
    /// With no `ETag` the put only succeeds if the key is free
    /// (`If-None-Match: *`); with one it only replaces that exact object
    /// (`If-Match`). S3 answers 412 when the precondition fails and 409 when a
    /// concurrent conditional write is in flight; both mean another run won.
    async fn put_lease(&self, lease: &LockInfo, replacing: Option<&str>) -> Result<bool> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(LOCK_KEY))
            .body(lease.encode()?.into())
            .content_type("application/json");
        let request = match replacing {
            Some(e_tag) => request.if_match(e_tag),
            None => request.if_none_match("*"),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(sdk_err) => match sdk_err.raw_response().map(|r| r.status().as_u16()) {
                Some(409 | 412) => Ok(false),
                _ => Err(StateError::LockFailed {
                    message: format!("S3 conditional put failed: {}", sdk_err.into_service_error()),
                }
                .into()),
            },
        }
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        let key = self.key(SNAPSHOT_KEY);
        debug!("Loading snapshot from s3://{}/{key}", self.bucket);

        let Some((json, _)) = self.get_object(&key).await? else {
            debug!("No snapshot found in S3");
            return Ok(None);
        };

        let snapshot: Snapshot = serde_json::from_str(&json)
            .map_err(|e| StateError::corrupted(format!("Failed to parse snapshot: {e}")))?;
        snapshot.check_version()?;

        info!(
            "Loaded snapshot for project: {}/{}",
            snapshot.project, snapshot.environment
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let key = self.key(SNAPSHOT_KEY);
        info!("Saving snapshot to s3://{}/{key}", self.bucket);

        let content = serde_json::to_string_pretty(snapshot).map_err(|e| {
            StateError::serialization(format!("Failed to serialize snapshot: {e}"))
        })?;

        self.put_object(&key, &content).await?;

        debug!("Snapshot saved successfully to S3");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let snapshot_key = self.key(SNAPSHOT_KEY);
        info!("Deleting snapshot from s3://{}/{snapshot_key}", self.bucket);

        self.delete_object(&snapshot_key).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        self.object_exists(&self.key(SNAPSHOT_KEY)).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let lease = LockInfo::new(holder);

        for _ in 0..ACQUIRE_ATTEMPTS {
            if self.put_lease(&lease, None).await? {
                info!(
                    "Acquired snapshot lock: {} (expires in {}s)",
                    lease.lock_id, LOCK_EXPIRY_SECS
                );
                return Ok(lease);
            }

            match self.read_lock().await? {
                Some((current, _)) if !current.is_expired() => {
                    return Err(current.conflict().into());
                }
                Some((stale, Some(e_tag))) => {
                    warn!(
                        "Taking over expired lock held by {} since {}",
                        stale.holder, stale.acquired_at
                    );
                    if self.put_lease(&lease, Some(&e_tag)).await? {
                        info!("Acquired snapshot lock: {}", lease.lock_id);
                        return Ok(lease);
                    }
                }
                Some((stale, None)) => {
                    return Err(StateError::LockFailed {
                        message: format!(
                            "expired lock of {} has no ETag and cannot be replaced safely",
                            stale.holder
                        ),
                    }
                    .into());
                }
                None => debug!("Lock released while acquiring, retrying"),
            }
        }

        Err(StateError::LockFailed {
            message: String::from("lock object kept changing while acquiring"),
        }
        .into())
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let (current, e_tag) = self.read_lock().await?.ok_or_else(|| lock_missing(lock_id))?;
        if current.lock_id != lock_id {
            return Err(current.superseded(lock_id).into());
        }

        let renewed = current.renewed();
        let Some(e_tag) = e_tag else {
            return Err(StateError::LockFailed {
                message: String::from("lock object has no ETag"),
            }
            .into());
        };
        if !self.put_lease(&renewed, Some(&e_tag)).await? {
            return Err(StateError::LockLost {
                lock_id: lock_id.to_string(),
                message: String::from("lock object changed during renewal"),
            }
            .into());
        }

        debug!("Renewed snapshot lock {lock_id} until {}", renewed.expires_at);
        Ok(renewed)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            Some((current, _)) if current.lock_id == lock_id => {
                self.delete_object(&self.key(LOCK_KEY)).await?;
                info!("Released snapshot lock: {lock_id}");
            }
            Some((current, _)) => debug!("Lock {lock_id} was replaced by {}", current.lock_id),
            None => debug!("Lock {lock_id} is not held, nothing to release"),
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.read_lock().await?.map(|(lease, _)| lease))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

/// Normalizes a key prefix to either empty or `segment/`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackplanError;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOCK_PATH: &str = "/state-bucket/team/snapshot.lock";

    fn store_at(server: &MockServer) -> S3SnapshotStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("key", "secret", None, None, "static"))
            .endpoint_url(server.uri())
            .force_path_style(true)
            .build();
        S3SnapshotStore::with_client(Client::from_conf(config), "state-bucket", Some("team"))
    }

    fn lease_response(lease: &LockInfo, e_tag: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("etag", e_tag)
            .set_body_bytes(lease.encode().expect("encode"))
    }

    #[tokio::test]
    async fn test_acquire_creates_lock_only_if_absent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(LOCK_PATH))
            .and(header_eq("if-none-match", "*"))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"new\""))
            .expect(1)
            .mount(&server)
            .await;

        let lease = store_at(&server).acquire_lock("run-a").await.expect("acquire");
        assert_eq!(lease.holder, "run-a");
    }

    #[tokio::test]
    async fn test_acquire_reports_live_holder_on_precondition_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(LOCK_PATH))
            .respond_with(ResponseTemplate::new(412))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LOCK_PATH))
            .respond_with(lease_response(&LockInfo::new("run-b"), "\"held\""))
            .mount(&server)
            .await;

        let err = store_at(&server).acquire_lock("run-a").await.expect_err("held");
        assert!(matches!(
            err,
            StackplanError::State(StateError::LockedByOther { holder, .. }) if holder == "run-b"
        ));
    }

    #[tokio::test]
    async fn test_expired_lock_is_replaced_by_etag() {
        let server = MockServer::start().await;
        let mut stale = LockInfo::new("crashed-run");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);

        Mock::given(method("PUT"))
            .and(path(LOCK_PATH))
            .and(header_eq("if-none-match", "*"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LOCK_PATH))
            .respond_with(lease_response(&stale, "\"stale\""))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(LOCK_PATH))
            .and(header_eq("if-match", "\"stale\""))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"new\""))
            .expect(1)
            .mount(&server)
            .await;

        let lease = store_at(&server).acquire_lock("run-a").await.expect("take over");
        assert_eq!(lease.holder, "run-a");
    }

    #[tokio::test]
    async fn test_renew_detects_replaced_lock() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LOCK_PATH))
            .respond_with(lease_response(&LockInfo::new("run-b"), "\"theirs\""))
            .mount(&server)
            .await;

        let err = store_at(&server).renew_lock("our-lock").await.expect_err("lost");
        assert!(matches!(err, StackplanError::State(StateError::LockLost { .. })));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("")), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("xray/prod")), "xray/prod/");
        assert_eq!(normalize_prefix(Some("/xray/prod/")), "xray/prod/");
    }
}
