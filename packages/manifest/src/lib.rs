#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Local manifest of keys already archived to the bucket.
//!
//! The manifest is the durable record of every key whose upload completed,
//! independent of what the bucket currently lists. It is stored as
//!
//! ```json
//! {
//!   "files": [
//!     "a.txt",
//!     "sub/b.txt"
//!   ]
//! }
//! ```
//!
//! Keys keep the order they were archived in and never repeat. When no
//! explicit path is given, each archive root gets its own manifest under
//! [`DEFAULT_ARCHIVE_DIR`], named by [`default_location_for`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use cold_archive_models::RemoteKey;
use serde::{Deserialize, Serialize};

/// Directory (relative to the working directory) holding derived manifests.
pub const DEFAULT_ARCHIVE_DIR: &str = "archives";

/// Extension appended to derived manifest names.
const MANIFEST_EXTENSION: &str = "json";

/// Errors reading or writing the manifest file.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The file exists but could not be read or written.
    #[error("Manifest I/O error at {path}: {source}")]
    Io {
        /// Manifest path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not a valid manifest document.
    #[error("Malformed manifest at {path}: {source}")]
    Parse {
        /// Manifest path.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The manifest could not be encoded.
    #[error("Failed to encode manifest for {path}: {source}")]
    Encode {
        /// Manifest path.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// On-disk shape of the manifest.
///
/// A missing or `null` `files` list reads as empty; older manifests written
/// after a run that uploaded nothing contain `{"files": null}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default, deserialize_with = "null_as_empty")]
    files: Vec<RemoteKey>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RemoteKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<RemoteKey>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Ordered, duplicate-free set of archived keys.
#[derive(Debug, Default, Clone)]
pub struct Manifest {
    keys: Vec<RemoteKey>,
    index: HashSet<RemoteKey>,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the manifest stored at `path`.
    ///
    /// A missing file is the normal first-run case and yields an empty
    /// manifest. Duplicate keys in the file are collapsed, keeping the
    /// first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file exists but cannot be read,
    /// or [`ManifestError::Parse`] if its contents are not a manifest.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "No manifest at {}, starting with an empty one",
                    path.display()
                );
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(ManifestError::Io {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        let file: ManifestFile =
            serde_json::from_slice(&data).map_err(|e| ManifestError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;

        let manifest: Self = file.files.into_iter().collect();
        log::info!(
            "Loaded {} archived key(s) from {}",
            manifest.len(),
            path.display()
        );

        Ok(manifest)
    }

    /// Writes the manifest to `path`, replacing any previous content.
    ///
    /// The document is written to a sibling `.tmp` file and renamed into
    /// place, so an interrupted save leaves the old manifest intact. The
    /// parent directory must already exist; [`ManifestLocation::resolve`]
    /// creates it for derived locations only.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be written,
    /// including when its directory does not exist.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let io_err = |source: std::io::Error| ManifestError::Io {
            path: path.display().to_string(),
            source,
        };

        let file = ManifestFile {
            files: self.keys.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| ManifestError::Encode {
            path: path.display().to_string(),
            source: e,
        })?;

        let tmp_path = tmp_path_for(path);
        std::fs::write(&tmp_path, json).map_err(io_err)?;
        std::fs::rename(&tmp_path, path).map_err(io_err)?;

        log::debug!("Saved {} key(s) to {}", self.len(), path.display());
        Ok(())
    }

    /// Whether `key` has been archived.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains(key)
    }

    /// Records `key` as archived.
    ///
    /// Returns `false` and leaves the manifest unchanged if the key is
    /// already present.
    pub fn insert(&mut self, key: RemoteKey) -> bool {
        if self.index.contains(&key) {
            return false;
        }
        self.index.insert(key.clone());
        self.keys.push(key);
        true
    }

    /// Archived keys in the order they were recorded.
    #[must_use]
    pub fn keys(&self) -> &[RemoteKey] {
        &self.keys
    }

    /// Number of archived keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys have been archived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<RemoteKey> for Manifest {
    fn from_iter<T: IntoIterator<Item = RemoteKey>>(iter: T) -> Self {
        let mut manifest = Self::new();
        for key in iter {
            manifest.insert(key);
        }
        manifest
    }
}

/// Where the manifest for a run lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocation {
    /// Path given explicitly by the user.
    Explicit(PathBuf),
    /// Path derived from the archive root under [`DEFAULT_ARCHIVE_DIR`].
    Default(PathBuf),
}

impl ManifestLocation {
    /// Picks the manifest path for `archive_root`.
    ///
    /// An explicit path is used as-is. Otherwise the path is derived with
    /// [`default_location_for`] and [`DEFAULT_ARCHIVE_DIR`] is created if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the default directory cannot be
    /// created.
    pub fn resolve(explicit: Option<PathBuf>, archive_root: &Path) -> Result<Self, ManifestError> {
        if let Some(path) = explicit {
            return Ok(Self::Explicit(path));
        }

        let dir = Path::new(DEFAULT_ARCHIVE_DIR);
        ensure_location_dir(dir).map_err(|e| ManifestError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;

        Ok(Self::Default(default_location_for(dir, archive_root)))
    }

    /// The manifest file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Explicit(path) | Self::Default(path) => path,
        }
    }
}

/// Ensures the manifest directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_location_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Derives the default manifest path for `archive_root` inside
/// `archive_dir`.
///
/// Path separators in the root's textual form become `_` and drive
/// separators (`:`) become `-`, so `/data/photos` maps to
/// `archive_dir/_data_photos.json`. Roots that differ only in those
/// characters (e.g. `a_b` and `a/b`) share a manifest.
#[must_use]
pub fn default_location_for(archive_dir: &Path, archive_root: &Path) -> PathBuf {
    let name: String = archive_root
        .to_string_lossy()
        .chars()
        .map(|c| match c {
            c if c == std::path::MAIN_SEPARATOR || c == '/' => '_',
            ':' => '-',
            c => c,
        })
        .collect();

    archive_dir.join(format!("{name}.{MANIFEST_EXTENSION}"))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
