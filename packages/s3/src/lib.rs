#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Object store backend for cold archiving.
//!
//! The sync pipeline only needs two things from a bucket: the full list of
//! keys it currently holds, and a way to write one file under a key. Both
//! live behind the [`ObjectStore`] trait so the reconciler can run against
//! an in-memory store in tests. [`S3Store`] is the real implementation on
//! top of `aws-sdk-s3`, and works with any S3-compatible service via
//! [`BackendConfig::endpoint_url`].

pub mod config;

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use cold_archive_models::{RemoteKey, StorageTier};

pub use config::{BackendConfig, ConfigError, DEFAULT_REGION};

/// Errors talking to the bucket.
///
/// Messages render the whole source chain, since SDK errors on their own
/// often read only "service error".
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A `ListObjectsV2` page request failed.
    #[error("Failed to list s3://{bucket}: {}", DisplayErrorContext(.source.as_ref()))]
    List {
        /// Bucket name.
        bucket: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Opening the local file or the `PutObject` request failed.
    #[error(
        "Failed to upload s3://{bucket}/{key}: {}",
        DisplayErrorContext(.source.as_ref())
    )]
    Upload {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK or I/O error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Every key present in the bucket at the moment it was listed.
#[derive(Debug, Default, Clone)]
pub struct RemoteInventory {
    keys: HashSet<String>,
}

impl RemoteInventory {
    /// Whether the bucket held `key` when listed.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Number of keys listed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the bucket was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<String> for RemoteInventory {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// A bucket the sync pipeline can list and write to.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket, for log messages.
    fn bucket(&self) -> &str;

    /// Lists every key in the bucket, following pagination to the end.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::List`] if any page fails. Keys from earlier
    /// pages are discarded.
    async fn list_all_keys(&self) -> Result<RemoteInventory, BackendError>;

    /// Uploads the file at `local_path` as `key` with storage class `tier`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Upload`] if the file cannot be opened or the
    /// backend rejects the write.
    async fn put_file(
        &self,
        local_path: &Path,
        key: &RemoteKey,
        tier: StorageTier,
    ) -> Result<(), BackendError>;
}

/// [`ObjectStore`] backed by Amazon S3 or an S3-compatible service.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Builds a client for `config.bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or no
    /// credentials can be resolved.
    pub async fn connect(config: &BackendConfig) -> Result<Self, ConfigError> {
        let sdk_config = config.load_sdk_config().await?;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            log::info!("Using custom S3 endpoint {endpoint}");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_all_keys(&self) -> Result<RemoteInventory, BackendError> {
        log::info!("Listing s3://{}", self.bucket);

        let mut keys = HashSet::new();
        let mut continuation_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(|e| BackendError::List {
                bucket: self.bucket.clone(),
                source: Box::new(e),
            })?;
            pages += 1;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    keys.insert(key.to_string());
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        log::info!("  found {} objects across {pages} page(s)", keys.len());
        Ok(RemoteInventory { keys })
    }

    async fn put_file(
        &self,
        local_path: &Path,
        key: &RemoteKey,
        tier: StorageTier,
    ) -> Result<(), BackendError> {
        let upload_err = |source: Box<dyn std::error::Error + Send + Sync>| BackendError::Upload {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source,
        };

        let result = async {
            let body = ByteStream::from_path(local_path)
                .await
                .map_err(|e| upload_err(Box::new(e)))?;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key.as_str())
                .body(body)
                .storage_class(StorageClass::from(tier.as_ref()))
                .send()
                .await
                .map_err(|e| upload_err(Box::new(e)))?;

            Ok::<(), BackendError>(())
        }
        .await;

        match &result {
            Ok(()) => log::info!(
                "Uploaded {} -> s3://{}/{key} ({tier})",
                local_path.display(),
                self.bucket
            ),
            Err(e) => log::error!("{e}"),
        }

        result
    }
}
