#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared data types for the cold archive sync pipeline.
//!
//! The walker produces [`FileCandidate`]s, the reconciler turns each one
//! into a [`Decision`], and the run as a whole is summarised by
//! [`SyncStats`]. Every uploaded object is stored with a [`StorageTier`].

use std::borrow::Borrow;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// An object key in the bucket's flat namespace.
///
/// Always `/`-separated and never starts with a separator. Construct it
/// from a local path with `cold_archive_walker::remote_key_for`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(String);

impl RemoteKey {
    /// Wraps an already-normalized key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemoteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RemoteKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RemoteKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A regular file found under the archive root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    /// Path to the file on disk (the archive root joined with the relative
    /// path).
    pub path: PathBuf,
    /// Key the file is stored under in the bucket.
    pub key: RemoteKey,
    /// File size in bytes at walk time.
    pub size: u64,
}

/// Why a file was not uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The key was present in the bucket listing taken at startup.
    InRemote,
    /// The key was recorded in the manifest by this or a previous run.
    InManifest,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::InRemote => "already in remote storage",
            Self::InManifest => "already recorded as archived",
        })
    }
}

/// Outcome of reconciling one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Leave the file alone.
    Skip(SkipReason),
    /// Transfer the file to the bucket.
    Upload,
}

/// Storage class applied to every uploaded object.
///
/// Names follow the S3 `x-amz-storage-class` values and parse
/// case-insensitively.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum StorageTier {
    /// Frequently accessed data.
    Standard,
    /// Infrequent access, multi-AZ.
    StandardIa,
    /// Infrequent access, single AZ.
    OnezoneIa,
    /// Automatic tiering by access pattern.
    IntelligentTiering,
    /// Glacier Flexible Retrieval.
    Glacier,
    /// Glacier Instant Retrieval.
    GlacierIr,
    /// Glacier Deep Archive: cheapest, 12h+ retrieval.
    #[default]
    DeepArchive,
}

/// Counters for one sync run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Files transferred to the bucket (or that would be, in a dry run).
    pub uploaded: u64,
    /// Files skipped because the bucket already held their key.
    pub skipped_remote: u64,
    /// Files skipped because the manifest already recorded their key.
    pub skipped_manifest: u64,
    /// Total bytes transferred.
    pub bytes_uploaded: u64,
}

impl SyncStats {
    /// Records a decision for a file of `size` bytes.
    pub const fn record(&mut self, decision: Decision, size: u64) {
        match decision {
            Decision::Skip(SkipReason::InRemote) => self.skipped_remote += 1,
            Decision::Skip(SkipReason::InManifest) => self.skipped_manifest += 1,
            Decision::Upload => {
                self.uploaded += 1;
                self.bytes_uploaded += size;
            }
        }
    }

    /// Total number of files considered.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.uploaded + self.skipped_remote + self.skipped_manifest
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::cast_precision_loss)] // display-only MB value
        let mb = self.bytes_uploaded as f64 / 1_048_576.0;
        write!(
            f,
            "{} uploaded ({mb:.1} MB), {} skipped (in bucket), {} skipped (in manifest)",
            self.uploaded, self.skipped_remote, self.skipped_manifest
        )
    }
}
