//! Backend configuration and AWS credential resolution.

use std::path::PathBuf;

use aws_config::{BehaviorVersion, Region};
use aws_runtime::env_config::file::{EnvConfigFileKind, EnvConfigFiles};

/// Region used when none is given.
pub const DEFAULT_REGION: &str = "ap-northeast-1";

/// Errors building the backend from user input.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The bucket name is empty.
    #[error("Bucket name must not be empty")]
    EmptyBucket,

    /// The region is empty.
    #[error("Region must not be empty")]
    EmptyRegion,

    /// `--cred` points at a file that does not exist.
    #[error("Credentials file not found: {0}")]
    CredentialsFileNotFound(String),

    /// No credentials provider could be resolved from the environment.
    #[error("No AWS credentials provider could be resolved")]
    NoCredentials,
}

/// Everything needed to talk to the bucket.
///
/// Built once at startup and handed to [`crate::S3Store::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Target bucket.
    pub bucket: String,
    /// AWS region of the bucket.
    pub region: String,
    /// Shared credentials file. `None` uses the platform default
    /// (`~/.aws/credentials`) and the rest of the default provider chain.
    pub credentials_file: Option<PathBuf>,
    /// Custom S3-compatible endpoint (`MinIO`, R2, ...). Enables path-style
    /// addressing.
    pub endpoint_url: Option<String>,
}

impl BackendConfig {
    /// Creates a config for `bucket` in the default region.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            credentials_file: None,
            endpoint_url: None,
        }
    }

    /// Checks the fields that can be validated without touching AWS.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty bucket or region, or a
    /// credentials file that does not exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::EmptyBucket);
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::EmptyRegion);
        }
        if let Some(path) = &self.credentials_file
            && !path.is_file()
        {
            return Err(ConfigError::CredentialsFileNotFound(
                path.display().to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the AWS SDK configuration for this backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails or no credentials
    /// provider is available.
    pub async fn load_sdk_config(&self) -> Result<aws_config::SdkConfig, ConfigError> {
        self.validate()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()));

        if let Some(path) = &self.credentials_file {
            log::info!("Using credentials file {}", path.display());
            let files = EnvConfigFiles::builder()
                .include_default_config_file(true)
                .with_file(EnvConfigFileKind::Credentials, path.clone())
                .build();
            loader = loader.profile_files(files);
        } else {
            log::info!("Using default AWS credentials chain (~/.aws/credentials)");
        }

        let sdk_config = loader.load().await;
        if sdk_config.credentials_provider().is_none() {
            return Err(ConfigError::NoCredentials);
        }

        Ok(sdk_config)
    }
}
