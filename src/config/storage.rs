//! Object storage configuration for meeting attachments.
//!
//! The relational store holds attachment metadata; this config only decides
//! where the attachment bytes live and how download links are signed.
//!
//! # Example Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//! bucket = "meeting-attachments"
//! presign_ttl_secs = 900
//!
//! [storage.s3]
//! region = "us-east-1"
//! # Credentials via env vars AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY
//! # or IAM role
//!
//! [storage.filesystem]
//! path = "/var/meetkeeper/objects"
//! base_url = "http://localhost:8080/objects"
//! signing_key = "${MEETKEEPER_SIGNING_KEY}"
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Where attachment bytes are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Storage backend to use.
    #[serde(default)]
    pub backend: ObjectStoreBackend,

    /// Bucket that holds every attachment blob.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Lifetime of presigned download URLs, in seconds.
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,

    /// Filesystem configuration (used when backend = "filesystem").
    #[serde(default)]
    pub filesystem: Option<FilesystemStorageConfig>,

    /// S3 configuration (required when backend = "s3").
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: ObjectStoreBackend::default(),
            bucket: default_bucket(),
            presign_ttl_secs: default_presign_ttl(),
            filesystem: None,
            s3: None,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::Validation(
                "storage.bucket cannot be empty".into(),
            ));
        }
        if self.bucket.contains('/') {
            return Err(ConfigError::Validation(
                "storage.bucket cannot contain '/'".into(),
            ));
        }
        if self.presign_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "storage.presign_ttl_secs must be greater than 0".into(),
            ));
        }
        // SigV4 caps presigned URLs at seven days.
        if self.backend == ObjectStoreBackend::S3 && self.presign_ttl_secs > 7 * 24 * 60 * 60 {
            return Err(ConfigError::Validation(
                "storage.presign_ttl_secs cannot exceed 604800 for S3".into(),
            ));
        }

        match self.backend {
            ObjectStoreBackend::Memory => Ok(()),
            ObjectStoreBackend::Filesystem => match &self.filesystem {
                Some(fs) => fs.validate().map_err(ConfigError::Validation),
                None => Ok(()),
            },
            ObjectStoreBackend::S3 => match &self.s3 {
                Some(s3) => s3.validate().map_err(ConfigError::Validation),
                None => Err(ConfigError::Validation(
                    "S3 storage backend requires [storage.s3] configuration".into(),
                )),
            },
        }
    }

    /// Filesystem settings, falling back to defaults when the section is absent.
    pub fn filesystem_or_default(&self) -> FilesystemStorageConfig {
        self.filesystem.clone().unwrap_or_default()
    }
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreBackend {
    /// Blobs live under a local directory, one subdirectory per bucket.
    /// Good for single-node deployments.
    #[default]
    Filesystem,

    /// Blobs live in process memory and vanish on restart.
    /// Testing and demos only.
    Memory,

    /// S3-compatible object storage (AWS S3, MinIO, R2, ...).
    /// Requires the `s3-storage` feature.
    S3,
}

/// S3-compatible object storage configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3StorageConfig {
    /// AWS region (e.g., "us-east-1").
    /// For non-AWS S3-compatible services, use their region name.
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL for S3-compatible services.
    /// Examples:
    /// - MinIO: "http://localhost:9000"
    /// - R2: "https://<account-id>.r2.cloudflarestorage.com"
    #[serde(default)]
    pub endpoint: Option<String>,

    /// AWS access key ID.
    /// If not specified, uses environment variables or IAM role.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// AWS secret access key.
    /// If not specified, uses environment variables or IAM role.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Use path-style URLs instead of virtual-hosted style.
    /// Required for MinIO and some S3-compatible services.
    #[serde(default)]
    pub force_path_style: bool,

    /// Key prefix prepended to every object key.
    /// Example: "meetkeeper/" stores `{meeting_id}/...` as `meetkeeper/{meeting_id}/...`
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Storage class for new objects (STANDARD, STANDARD_IA, ...).
    #[serde(default)]
    pub storage_class: Option<String>,
}

impl std::fmt::Debug for S3StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StorageConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field(
                "access_key_id",
                &self.access_key_id.as_ref().map(|_| "****"),
            )
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "****"),
            )
            .field("force_path_style", &self.force_path_style)
            .field("key_prefix", &self.key_prefix)
            .field("storage_class", &self.storage_class)
            .finish()
    }
}

impl S3StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Region is required unless using a custom endpoint
        if self.region.is_none() && self.endpoint.is_none() {
            return Err("S3 requires either 'region' or 'endpoint' to be specified".to_string());
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(
                "S3 'access_key_id' and 'secret_access_key' must be set together".to_string(),
            );
        }
        Ok(())
    }

    /// Full S3 key for an object key.
    pub fn object_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                format!("{}/{}", prefix, key)
            }
            None => key.to_string(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemStorageConfig {
    /// Base directory. Objects are stored as `{path}/{bucket}/{key}`.
    #[serde(default = "default_fs_path")]
    pub path: String,

    /// Create the directory if it doesn't exist.
    #[serde(default = "default_true")]
    pub create_dir: bool,

    /// File permissions (Unix mode) for new files.
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Directory permissions (Unix mode) for new directories.
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,

    /// Public base URL that serves `{bucket}/{key}`; presigned links are
    /// built on top of it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HMAC key used to sign download links. A random per-process key is
    /// used when unset, so links do not survive a restart.
    #[serde(default)]
    pub signing_key: Option<String>,
}

impl std::fmt::Debug for FilesystemStorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemStorageConfig")
            .field("path", &self.path)
            .field("create_dir", &self.create_dir)
            .field("file_mode", &format_args!("{:o}", self.file_mode))
            .field("dir_mode", &format_args!("{:o}", self.dir_mode))
            .field("base_url", &self.base_url)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "****"))
            .finish()
    }
}

impl FilesystemStorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.path.is_empty() {
            return Err("Filesystem storage path cannot be empty".to_string());
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(format!(
                "Filesystem storage base_url is not a valid URL: {}",
                self.base_url
            ));
        }
        if self.signing_key.as_deref() == Some("") {
            return Err("Filesystem storage signing_key cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for FilesystemStorageConfig {
    fn default() -> Self {
        Self {
            path: default_fs_path(),
            create_dir: true,
            file_mode: default_file_mode(),
            dir_mode: default_dir_mode(),
            base_url: default_base_url(),
            signing_key: None,
        }
    }
}

fn default_bucket() -> String {
    "meeting-attachments".to_string()
}

fn default_presign_ttl() -> u64 {
    15 * 60
}

fn default_fs_path() -> String {
    "data/objects".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080/objects".to_string()
}

fn default_true() -> bool {
    true
}

fn default_file_mode() -> u32 {
    0o600
}

fn default_dir_mode() -> u32 {
    0o700
}
