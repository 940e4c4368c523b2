#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for cold archive.
//!
//! Uploads every file under `--local` to `--bucket` unless the bucket
//! already holds its key or the manifest records it as archived. Exits
//! non-zero with a single diagnostic line on the first unrecoverable error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use cold_archive_cli_utils::IndicatifProgress;
use cold_archive_manifest::{ManifestError, ManifestLocation};
use cold_archive_models::{StorageTier, SyncStats};
use cold_archive_s3::{BackendConfig, ConfigError, DEFAULT_REGION, S3Store};
use cold_archive_sync::{SavePolicy, SyncError, SyncOptions};
use cold_archive_walker::WalkErrorPolicy;

#[derive(Parser, Debug)]
#[command(
    name = "cold_archive",
    about = "Archive a local directory to an S3 bucket, uploading each file once"
)]
struct Cli {
    /// Name of the S3 bucket
    #[arg(long)]
    bucket: String,

    /// Local directory to archive
    #[arg(long)]
    local: PathBuf,

    /// AWS region of the bucket
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,

    /// Path to an AWS shared credentials file (defaults to `~/.aws/credentials`)
    #[arg(long)]
    cred: Option<PathBuf>,

    /// Path to the manifest JSON file (defaults to `archives/<derived from --local>.json`)
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Storage class for uploaded objects (e.g. `DEEP_ARCHIVE`, `GLACIER`, `STANDARD`)
    #[arg(long, default_value_t = StorageTier::DeepArchive)]
    storage_class: StorageTier,

    /// Custom S3-compatible endpoint URL (`MinIO`, R2, ...)
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Save the manifest after every successful upload instead of once at the end
    #[arg(long)]
    save_after_each_upload: bool,

    /// Log and skip unreadable files or directories instead of aborting
    #[arg(long)]
    skip_unreadable: bool,

    /// Report what would be uploaded without uploading or writing the manifest
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            credentials_file: self.cred.clone(),
            endpoint_url: self.endpoint_url.clone(),
        }
    }

    const fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            storage_tier: self.storage_class,
            save_policy: if self.save_after_each_upload {
                SavePolicy::AfterEachUpload
            } else {
                SavePolicy::EndOfRun
            },
            walk_policy: if self.skip_unreadable {
                WalkErrorPolicy::SkipUnreadable
            } else {
                WalkErrorPolicy::FailFast
            },
            dry_run: self.dry_run,
        }
    }
}

/// Failures that end the process, tagged with the stage.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to prepare manifest location: {0}")]
    ManifestLocation(#[from] ManifestError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

async fn archive(cli: Cli) -> Result<SyncStats, CliError> {
    let multi = cold_archive_cli_utils::init_logger();

    let location = ManifestLocation::resolve(cli.archive.clone(), &cli.local)?;
    log::info!("Using manifest {}", location.path().display());

    let store = S3Store::connect(&cli.backend_config()).await?;

    let progress = IndicatifProgress::files_spinner(&multi, "starting");
    let stats = cold_archive_sync::run(
        &store,
        &cli.local,
        location.path(),
        cli.sync_options(),
        &progress,
    )
    .await?;

    Ok(stats)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let start = Instant::now();

    match archive(cli).await {
        Ok(stats) => {
            log::info!(
                "Process completed successfully in {:.1}s: {stats}",
                start.elapsed().as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
