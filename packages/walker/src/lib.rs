#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Walks an archive root and yields every regular file with its bucket key.
//!
//! Directories are descended into but never yielded, and symbolic links
//! are neither followed nor yielded. Entries are visited in file-name order
//! within each directory, so two walks over an unchanged tree produce the
//! same sequence.
//!
//! Keys are the file's path relative to the root with components joined by
//! `/`, whatever the platform separator is. A file whose relative path is
//! not valid UTF-8 has no key and is reported as a [`WalkError`].

use std::path::{Component, Path, PathBuf};

use cold_archive_models::{FileCandidate, RemoteKey};
use walkdir::WalkDir;

/// Errors from walking the archive root.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    /// The archive root does not exist or is not a directory.
    #[error("Archive root is not a directory: {0}")]
    NotADirectory(String),

    /// An entry could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path of the offending entry.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A path does not lie under the archive root.
    #[error("{path} is not inside archive root {root}")]
    OutsideRoot {
        /// The path that was being keyed.
        path: String,
        /// The archive root.
        root: String,
    },

    /// A path under the archive root is not valid UTF-8.
    #[error("Path is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// The offending path, lossily rendered.
        path: String,
    },
}

impl From<walkdir::Error> for WalkError {
    fn from(e: walkdir::Error) -> Self {
        let path = e
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Self::Io {
            path,
            source: std::io::Error::from(e),
        }
    }
}

/// What to do when an entry cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalkErrorPolicy {
    /// Yield the error and stop walking.
    #[default]
    FailFast,
    /// Log a warning and carry on with the next entry.
    SkipUnreadable,
}

/// Lazy iterator over the regular files under an archive root.
///
/// Created by [`walk`].
pub struct Walk {
    root: PathBuf,
    entries: walkdir::IntoIter,
    policy: WalkErrorPolicy,
    finished: bool,
}

/// Starts walking `root`.
///
/// # Errors
///
/// Returns [`WalkError::NotADirectory`] if `root` is missing or is not a
/// directory.
pub fn walk(root: &Path, policy: WalkErrorPolicy) -> Result<Walk, WalkError> {
    if !root.is_dir() {
        return Err(WalkError::NotADirectory(root.display().to_string()));
    }

    let entries = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    Ok(Walk {
        root: root.to_path_buf(),
        entries,
        policy,
        finished: false,
    })
}

impl Walk {
    /// Applies the error policy. Returns the error if the walk must stop.
    fn on_error(&mut self, err: WalkError) -> Option<WalkError> {
        match self.policy {
            WalkErrorPolicy::FailFast => {
                self.finished = true;
                Some(err)
            }
            WalkErrorPolicy::SkipUnreadable => {
                log::warn!("Skipping unreadable entry: {err}");
                None
            }
        }
    }
}

impl Iterator for Walk {
    type Item = Result<FileCandidate, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => match self.on_error(e.into()) {
                    Some(err) => return Some(Err(err)),
                    None => continue,
                },
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                log::debug!("Ignoring symlink {}", entry.path().display());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => match self.on_error(e.into()) {
                    Some(err) => return Some(Err(err)),
                    None => continue,
                },
            };

            let key = match remote_key_for(&self.root, entry.path()) {
                Ok(key) => key,
                Err(e) => match self.on_error(e) {
                    Some(err) => return Some(Err(err)),
                    None => continue,
                },
            };

            return Some(Ok(FileCandidate {
                path: entry.into_path(),
                key,
                size,
            }));
        }
    }
}

/// Builds the bucket key for `path` relative to `root`.
///
/// Components are joined with `/` and the key never starts with a
/// separator.
///
/// # Errors
///
/// Returns [`WalkError::OutsideRoot`] if `path` is not strictly inside
/// `root`, or [`WalkError::NonUtf8Path`] if a component is not valid UTF-8.
pub fn remote_key_for(root: &Path, path: &Path) -> Result<RemoteKey, WalkError> {
    let outside = || WalkError::OutsideRoot {
        path: path.display().to_string(),
        root: root.display().to_string(),
    };

    let relative = path.strip_prefix(root).map_err(|_| outside())?;

    let mut key = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                if !key.is_empty() {
                    key.push('/');
                }
                let part = part.to_str().ok_or_else(|| WalkError::NonUtf8Path {
                    path: path.display().to_string(),
                })?;
                key.push_str(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(outside());
            }
        }
    }

    if key.is_empty() {
        return Err(outside());
    }

    Ok(RemoteKey::new(key))
}
