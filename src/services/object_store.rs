//! Pluggable object storage backends for attachment bytes.
//!
//! Attachment metadata lives in the relational store; the blob itself lives
//! in an [`ObjectStore`] under `{bucket}/{key}`:
//!
//! - **Filesystem**: objects on the local filesystem, download links signed
//!   with HMAC-SHA256
//! - **Memory**: objects in process memory (tests, demos)
//! - **S3**: S3-compatible object storage with SigV4 presigned links
//!
//! Deletes are idempotent: removing a key that is already gone succeeds and
//! logs a warning. That is the only storage failure treated as success.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
#[cfg(feature = "s3-storage")]
use tracing::error;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "s3-storage")]
use crate::config::S3StorageConfig;
use crate::config::{FilesystemStorageConfig, ObjectStoreBackend, StorageConfig};

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during object storage operations.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Presign error: {0}")]
    Presign(String),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Trait for pluggable object storage backends.
///
/// Implementations must be `Send + Sync` to support async contexts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `content` under `bucket/key`, replacing any existing object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<()>;

    /// Delete `bucket/key`. A missing object is success.
    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()>;

    /// Produce a time-limited GET URL for `bucket/key`.
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration)
    -> ObjectStoreResult<String>;

    async fn exists(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool>;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Reject keys that could escape the bucket directory.
fn validate_key(key: &str) -> ObjectStoreResult<()> {
    if key.is_empty() {
        return Err(ObjectStoreError::InvalidKey("empty key".to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || key.contains('\\') {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Unix timestamp at which a link issued now with `ttl` expires.
fn expires_at(ttl: Duration) -> ObjectStoreResult<i64> {
    i64::try_from(ttl.as_secs())
        .ok()
        .and_then(|secs| Utc::now().timestamp().checked_add(secs))
        .ok_or_else(|| ObjectStoreError::Presign(format!("TTL too large: {}s", ttl.as_secs())))
}

/// Filesystem object storage backend.
///
/// Objects are stored as `{base_path}/{bucket}/{key}`; the key's `/`
/// separators become subdirectories.
pub struct FilesystemObjectStore {
    config: FilesystemStorageConfig,
    signing_key: Vec<u8>,
}

impl FilesystemObjectStore {
    pub fn new(config: FilesystemStorageConfig) -> ObjectStoreResult<Self> {
        // Ensure the storage directory exists if create_dir is enabled
        if config.create_dir {
            let path = Path::new(&config.path);
            if !path.exists() {
                info!(path = %config.path, "Creating object storage directory");
                std::fs::create_dir_all(path)?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        path,
                        std::fs::Permissions::from_mode(config.dir_mode),
                    )?;
                }
            }
        }

        let signing_key = match &config.signing_key {
            Some(key) => key.as_bytes().to_vec(),
            None => {
                warn!("No storage signing key configured; download links will not survive a restart");
                let mut key = uuid::Uuid::new_v4().as_bytes().to_vec();
                key.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
                key
            }
        };

        Ok(Self {
            config,
            signing_key,
        })
    }

    fn object_path(&self, bucket: &str, key: &str) -> ObjectStoreResult<PathBuf> {
        validate_key(bucket)?;
        validate_key(key)?;
        Ok(PathBuf::from(&self.config.path).join(bucket).join(key))
    }

    fn signature(&self, bucket: &str, key: &str, expires: i64) -> ObjectStoreResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| ObjectStoreError::Config(format!("Invalid signing key: {}", e)))?;
        mac.update(format!("{}/{}\n{}", bucket, key, expires).as_bytes());
        Ok(mac)
    }

    /// Check a link produced by [`ObjectStore::presign_get`].
    ///
    /// `expires` is the unix timestamp from the link's query string and
    /// `signature` its hex-encoded HMAC.
    pub fn verify_presigned(&self, bucket: &str, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        match self.signature(bucket, key, expires) {
            Ok(mac) => mac.verify_slice(&provided).is_ok(),
            Err(_) => false,
        }
    }

    /// Read an object back. Used by whatever serves signed download links.
    pub async fn read(&self, bucket: &str, key: &str) -> ObjectStoreResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ObjectStoreError::NotFound(
                format!("{}/{}", bucket, key),
            )),
            Err(e) => Err(ObjectStoreError::Io(e)),
        }
    }

    async fn create_parent(&self, path: &Path) -> ObjectStoreResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        tokio::fs::create_dir_all(parent).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(self.config.dir_mode))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<()> {
        let path = self.object_path(bucket, key)?;
        debug!(path = %path.display(), content_type, "Storing object on filesystem");
        self.create_parent(&path).await?;

        // Write to a temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &temp_path,
                std::fs::Permissions::from_mode(self.config.file_mode),
            )
            .await?;
        }

        tokio::fs::rename(&temp_path, &path).await?;
        debug!(bucket, key, "Object stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Object deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(bucket, key, "Object not found during deletion");
                Ok(())
            }
            Err(e) => Err(ObjectStoreError::Io(e)),
        }
    }

    #[instrument(skip(self))]
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> ObjectStoreResult<String> {
        validate_key(bucket)?;
        validate_key(key)?;

        let expires = expires_at(ttl)?;
        let signature = hex::encode(self.signature(bucket, key, expires)?.finalize().into_bytes());

        let mut url = url::Url::parse(&self.config.base_url)
            .map_err(|e| ObjectStoreError::Config(format!("Invalid base_url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Config("base_url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(bucket)
            .extend(key.split('/'));
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);

        Ok(url.into())
    }

    #[instrument(skip(self))]
    async fn exists(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
        let path = self.object_path(bucket, key)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// A stored in-memory object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content: Bytes,
    pub content_type: String,
}

/// In-memory object storage backend.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<(String, String), StoredObject>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<()> {
        validate_key(key)?;
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                content,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        if self
            .objects
            .remove(&(bucket.to_string(), key.to_string()))
            .is_none()
        {
            warn!(bucket, key, "Object not found during deletion");
        }
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> ObjectStoreResult<String> {
        let expires = expires_at(ttl)?;
        Ok(format!("memory://{}/{}?expires={}", bucket, key, expires))
    }

    async fn exists(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
        Ok(self
            .objects
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// S3-compatible object storage backend.
///
/// Supports AWS S3, MinIO, Cloudflare R2 and other S3-compatible services.
/// Requires the `s3-storage` feature.
#[cfg(feature = "s3-storage")]
pub struct S3ObjectStore {
    config: S3StorageConfig,
    client: aws_sdk_s3::Client,
}

#[cfg(feature = "s3-storage")]
impl S3ObjectStore {
    pub async fn new(config: S3StorageConfig) -> ObjectStoreResult<Self> {
        info!(endpoint = ?config.endpoint, region = ?config.region, "Initializing S3 object storage");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None, // session token
                None, // expiry
                "meetkeeper-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());

        Ok(Self { config, client })
    }
}

#[cfg(feature = "s3-storage")]
#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<()> {
        let key = self.config.object_key(key);
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .content_type(content_type)
            .body(aws_sdk_s3::primitives::ByteStream::from(content));

        if let Some(storage_class) = &self.config.storage_class {
            request = request.storage_class(storage_class.as_str().into());
        }

        request.send().await.map_err(|e| {
            error!(error = %e, "Failed to upload to S3");
            ObjectStoreError::S3(e.to_string())
        })?;

        debug!(bucket, key, "Object stored in S3");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        let key = self.config.object_key(key);
        match self
            .client
            .delete_object()
            .bucket(bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => {
                debug!(bucket, key, "Object deleted from S3");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("NoSuchKey") || message.contains("NotFound") {
                    warn!(bucket, key, "Object not found during deletion");
                    Ok(())
                } else {
                    error!(error = %e, "Failed to delete from S3");
                    Err(ObjectStoreError::S3(message))
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> ObjectStoreResult<String> {
        let presigning = aws_sdk_s3::presigning::PresigningConfig::expires_in(ttl)
            .map_err(|e| ObjectStoreError::Presign(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(self.config.object_key(key))
            .presigned(presigning)
            .await
            .map_err(|e| ObjectStoreError::Presign(e.to_string()))?;
        Ok(request.uri().to_string())
    }

    #[instrument(skip(self))]
    async fn exists(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(self.config.object_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(ObjectStoreError::S3(e.to_string()))
                }
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Create an object storage backend from configuration.
pub async fn create_object_store(config: &StorageConfig) -> ObjectStoreResult<Arc<dyn ObjectStore>> {
    match config.backend {
        ObjectStoreBackend::Filesystem => {
            let fs_config = config.filesystem_or_default();
            info!(path = %fs_config.path, "Using filesystem object storage backend");
            Ok(Arc::new(FilesystemObjectStore::new(fs_config)?))
        }
        ObjectStoreBackend::Memory => {
            warn!("Using in-memory object storage backend; attachments will not persist");
            Ok(Arc::new(MemoryObjectStore::new()))
        }
        #[cfg(feature = "s3-storage")]
        ObjectStoreBackend::S3 => {
            let s3_config = config.s3.clone().ok_or_else(|| {
                ObjectStoreError::Config("S3 backend requires [storage.s3] config".to_string())
            })?;
            info!(bucket = %config.bucket, "Using S3 object storage backend");
            Ok(Arc::new(S3ObjectStore::new(s3_config).await?))
        }
        #[cfg(not(feature = "s3-storage"))]
        ObjectStoreBackend::S3 => Err(ObjectStoreError::Config(
            "S3 object storage backend requires the 's3-storage' feature. \
                Rebuild with: cargo build --features s3-storage"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn fs_config(dir: &TempDir) -> FilesystemStorageConfig {
        FilesystemStorageConfig {
            path: dir.path().to_string_lossy().to_string(),
            signing_key: Some("test-signing-key".to_string()),
            base_url: "http://files.test/objects/".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_key_rejects_traversal() {
        assert!(validate_key("m/abc-file.txt").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("m/..\\x").is_err());
    }

    #[tokio::test]
    async fn test_filesystem_put_exists_delete() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemObjectStore::new(fs_config(&dir)).unwrap();

        store
            .put("bucket", "m1/abc-notes.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        assert!(store.exists("bucket", "m1/abc-notes.txt").await.unwrap());
        assert_eq!(store.read("bucket", "m1/abc-notes.txt").await.unwrap(), b"hello");
        assert!(dir.path().join("bucket/m1/abc-notes.txt").exists());

        store.delete("bucket", "m1/abc-notes.txt").await.unwrap();
        assert!(!store.exists("bucket", "m1/abc-notes.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_filesystem_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemObjectStore::new(fs_config(&dir)).unwrap();

        // Twice, and for a key that never existed
        store.delete("bucket", "m1/never-there.txt").await.unwrap();
        store.delete("bucket", "m1/never-there.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_filesystem_presigned_url_verifies() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemObjectStore::new(fs_config(&dir)).unwrap();

        let link = store
            .presign_get("bucket", "m1/abc-report.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        let url = url::Url::parse(&link).unwrap();
        assert_eq!(url.path(), "/objects/bucket/m1/abc-report.pdf");

        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        let expires: i64 = query["expires"].parse().unwrap();
        let signature = &query["signature"];

        assert!(store.verify_presigned("bucket", "m1/abc-report.pdf", expires, signature));
        assert!(!store.verify_presigned("bucket", "m1/other.pdf", expires, signature));
        assert!(!store.verify_presigned("bucket", "m1/abc-report.pdf", expires + 1, signature));
        assert!(!store.verify_presigned("bucket", "m1/abc-report.pdf", 0, signature));
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_rejected() {
        let dir = TempDir::new().unwrap();
        let fs = FilesystemObjectStore::new(fs_config(&dir)).unwrap();
        let memory = MemoryObjectStore::new();

        // Fits in i64 but overflows once added to the current time.
        let near_max = Duration::from_secs(i64::MAX as u64);
        for ttl in [Duration::MAX, near_max] {
            assert!(matches!(
                fs.presign_get("bucket", "m1/a.txt", ttl).await,
                Err(ObjectStoreError::Presign(_))
            ));
            assert!(matches!(
                memory.presign_get("bucket", "m1/a.txt", ttl).await,
                Err(ObjectStoreError::Presign(_))
            ));
        }

        assert!(expires_at(Duration::from_secs(60)).unwrap() > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryObjectStore::new();
        store
            .put("b", "m/k.txt", Bytes::from_static(b"data"), "text/plain")
            .await
            .unwrap();

        let object = store.get("b", "m/k.txt").unwrap();
        assert_eq!(object.content, Bytes::from_static(b"data"));
        assert_eq!(object.content_type, "text/plain");
        assert!(store.exists("b", "m/k.txt").await.unwrap());

        store.delete("b", "m/k.txt").await.unwrap();
        store.delete("b", "m/k.txt").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_create_memory_store_from_config() {
        let config = StorageConfig {
            backend: ObjectStoreBackend::Memory,
            ..Default::default()
        };
        let store = create_object_store(&config).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
