#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incremental archival of a local tree into a bucket.
//!
//! A run reconciles three views of the world:
//!
//! 1. the **bucket inventory**, listed once before anything is uploaded;
//! 2. the **manifest**, the local record of keys uploaded by earlier runs
//!    (and by this run so far);
//! 3. the **local tree**, walked lazily.
//!
//! Each file is skipped if its key is in the inventory, else skipped if it
//! is in the manifest, else uploaded. A key enters the manifest only after
//! its upload succeeded, and the first failure ends the run. Running again
//! afterwards is always safe: it resumes from the manifest plus whatever
//! the bucket already holds.
//!
//! ## Manifest durability
//!
//! With [`SavePolicy::EndOfRun`] the manifest is written once, after the
//! walk completes. If the process dies mid-run, uploads made since it
//! started are not recorded; the next run re-uploads only those that the
//! bucket listing does not already show. [`SavePolicy::AfterEachUpload`]
//! closes that window at the cost of one manifest write per upload.

pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cold_archive_manifest::{Manifest, ManifestError};
use cold_archive_models::{Decision, FileCandidate, RemoteKey, SkipReason, StorageTier, SyncStats};
use cold_archive_s3::{BackendError, ObjectStore, RemoteInventory};
use cold_archive_walker::{WalkError, WalkErrorPolicy};

use crate::progress::ProgressCallback;

/// Errors that end a sync run, tagged with the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Loading or saving the manifest failed.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Listing the bucket failed. Nothing was uploaded.
    #[error("Bucket listing failed: {0}")]
    Inventory(#[source] BackendError),

    /// Walking the archive root failed.
    #[error("Scanning local files failed: {0}")]
    Walk(#[from] WalkError),

    /// An upload failed. Its key was not recorded.
    #[error("Upload failed: {0}")]
    Upload(#[source] BackendError),
}

/// When the manifest is written to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SavePolicy {
    /// Once, after every file has been processed.
    #[default]
    EndOfRun,
    /// After every successful upload, and once more at the end.
    AfterEachUpload,
}

/// Knobs for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Storage class for uploaded objects.
    pub storage_tier: StorageTier,
    /// When to persist the manifest.
    pub save_policy: SavePolicy,
    /// How to treat unreadable entries in the local tree.
    pub walk_policy: WalkErrorPolicy,
    /// Decide and report without uploading or writing the manifest.
    pub dry_run: bool,
}

/// Decides, file by file, what to upload and records what was uploaded.
///
/// Owns the inventory snapshot and the manifest for the duration of a run.
pub struct Reconciler<'a> {
    store: &'a dyn ObjectStore,
    inventory: RemoteInventory,
    manifest: Manifest,
    manifest_path: PathBuf,
    options: SyncOptions,
    stats: SyncStats,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler over an inventory snapshot and a loaded manifest.
    #[must_use]
    pub fn new(
        store: &'a dyn ObjectStore,
        inventory: RemoteInventory,
        manifest: Manifest,
        manifest_path: &Path,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            inventory,
            manifest,
            manifest_path: manifest_path.to_path_buf(),
            options,
            stats: SyncStats::default(),
        }
    }

    /// Decides what to do with `key`. The bucket inventory is consulted
    /// before the manifest.
    #[must_use]
    pub fn decide(&self, key: &RemoteKey) -> Decision {
        if self.inventory.contains(key.as_str()) {
            Decision::Skip(SkipReason::InRemote)
        } else if self.manifest.contains(key.as_str()) {
            Decision::Skip(SkipReason::InManifest)
        } else {
            Decision::Upload
        }
    }

    /// Reconciles one file, uploading it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Upload`] if the upload fails, or
    /// [`SyncError::Manifest`] if a per-upload manifest save fails.
    pub async fn process(&mut self, candidate: FileCandidate) -> Result<Decision, SyncError> {
        let decision = self.decide(&candidate.key);

        match decision {
            Decision::Skip(reason) => {
                log::info!("Skipping {}: {reason}", candidate.key);
            }
            Decision::Upload if self.options.dry_run => {
                log::info!(
                    "Would upload {} -> {} ({} bytes)",
                    candidate.path.display(),
                    candidate.key,
                    candidate.size
                );
            }
            Decision::Upload => {
                self.store
                    .put_file(&candidate.path, &candidate.key, self.options.storage_tier)
                    .await
                    .map_err(SyncError::Upload)?;

                self.manifest.insert(candidate.key);
                if self.options.save_policy == SavePolicy::AfterEachUpload {
                    self.manifest.save(&self.manifest_path)?;
                }
            }
        }

        self.stats.record(decision, candidate.size);
        Ok(decision)
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// The in-memory manifest, including keys uploaded this run.
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Persists the manifest (unless this is a dry run) and returns the
    /// run's counters.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Manifest`] if the manifest cannot be written.
    pub fn finish(self) -> Result<SyncStats, SyncError> {
        if self.options.dry_run {
            log::info!("Dry run: manifest not written");
        } else {
            self.manifest.save(&self.manifest_path)?;
            log::info!(
                "Manifest saved to {} ({} key(s))",
                self.manifest_path.display(),
                self.manifest.len()
            );
        }
        Ok(self.stats)
    }
}

/// Archives every file under `root` that is neither in the bucket nor in
/// the manifest at `manifest_path`.
///
/// The manifest is loaded and the bucket listed before the walk starts; a
/// listing failure therefore ends the run before any upload and leaves the
/// manifest file untouched.
///
/// # Errors
///
/// Returns the first [`SyncError`] encountered. See the crate docs for
/// what is persisted when a run fails part-way.
pub async fn run(
    store: &dyn ObjectStore,
    root: &Path,
    manifest_path: &Path,
    options: SyncOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<SyncStats, SyncError> {
    let manifest = Manifest::load(manifest_path)?;

    progress.set_message(format!("Listing s3://{}", store.bucket()));
    let inventory = store.list_all_keys().await.map_err(SyncError::Inventory)?;

    let files = cold_archive_walker::walk(root, options.walk_policy)?;
    log::info!(
        "Archiving {} -> s3://{} ({})",
        root.display(),
        store.bucket(),
        options.storage_tier
    );
    progress.set_message(format!("Archiving {}", root.display()));

    let mut reconciler = Reconciler::new(store, inventory, manifest, manifest_path, options);

    for candidate in files {
        let candidate = candidate?;
        progress.set_message(candidate.key.to_string());
        reconciler.process(candidate).await?;
        progress.inc(1);
    }

    let stats = reconciler.finish()?;
    progress.finish(format!("{} file(s) processed", stats.total()));

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};
    use std::fs;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::progress::null_progress;

    /// In-memory bucket that records every upload.
    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<BTreeMap<String, StorageTier>>,
        uploads: Mutex<Vec<String>>,
        fail_listing: bool,
        reject_keys: HashSet<String>,
    }

    impl MemoryStore {
        fn with_objects(keys: &[&str]) -> Self {
            let store = Self::default();
            {
                let mut objects = store.objects.lock().unwrap();
                for key in keys {
                    objects.insert((*key).to_string(), StorageTier::Standard);
                }
            }
            store
        }

        fn uploads(&self) -> Vec<String> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        fn bucket(&self) -> &str {
            "test-bucket"
        }

        async fn list_all_keys(&self) -> Result<RemoteInventory, BackendError> {
            if self.fail_listing {
                return Err(BackendError::List {
                    bucket: "test-bucket".to_string(),
                    source: "connection reset".into(),
                });
            }
            Ok(self.objects.lock().unwrap().keys().cloned().collect())
        }

        async fn put_file(
            &self,
            local_path: &Path,
            key: &RemoteKey,
            tier: StorageTier,
        ) -> Result<(), BackendError> {
            if self.reject_keys.contains(key.as_str()) || !local_path.is_file() {
                return Err(BackendError::Upload {
                    bucket: "test-bucket".to_string(),
                    key: key.to_string(),
                    source: "rejected".into(),
                });
            }
            self.objects.lock().unwrap().insert(key.to_string(), tier);
            self.uploads.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        manifest_path: PathBuf,
    }

    fn fixture(files: &[&str]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        for file in files {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, file.as_bytes()).unwrap();
        }
        let archive_dir = tmp.path().join("archives");
        fs::create_dir_all(&archive_dir).unwrap();
        let manifest_path = archive_dir.join("manifest.json");
        Fixture {
            _tmp: tmp,
            root,
            manifest_path,
        }
    }

    async fn sync(
        store: &MemoryStore,
        fx: &Fixture,
        options: SyncOptions,
    ) -> Result<SyncStats, SyncError> {
        run(store, &fx.root, &fx.manifest_path, options, &null_progress()).await
    }

    fn manifest_keys(path: &Path) -> Vec<String> {
        Manifest::load(path)
            .unwrap()
            .keys()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[tokio::test]
    async fn uploads_everything_into_empty_bucket() {
        let fx = fixture(&["a.txt", "sub/b.txt"]);
        let store = MemoryStore::default();

        let stats = sync(&store, &fx, SyncOptions::default()).await.unwrap();

        assert_eq!(store.uploads(), ["a.txt", "sub/b.txt"]);
        assert_eq!(stats.uploaded, 2);
        assert_eq!(
            fs::read_to_string(&fx.manifest_path).unwrap(),
            "{\n  \"files\": [\n    \"a.txt\",\n    \"sub/b.txt\"\n  ]\n}"
        );
    }

    #[tokio::test]
    async fn keys_already_in_bucket_are_not_uploaded() {
        let fx = fixture(&["a.txt", "sub/b.txt"]);
        let store = MemoryStore::with_objects(&["a.txt"]);

        let stats = sync(&store, &fx, SyncOptions::default()).await.unwrap();

        assert_eq!(store.uploads(), ["sub/b.txt"]);
        assert_eq!(stats.skipped_remote, 1);
        assert_eq!(manifest_keys(&fx.manifest_path), ["sub/b.txt"]);
    }

    #[tokio::test]
    async fn second_run_uploads_nothing() {
        let fx = fixture(&["a.txt", "sub/b.txt", "sub/deep/c.txt"]);
        let store = MemoryStore::default();

        sync(&store, &fx, SyncOptions::default()).await.unwrap();
        let second = sync(&store, &fx, SyncOptions::default()).await.unwrap();

        assert_eq!(second.uploaded, 0);
        assert_eq!(second.skipped_remote, 3);
        assert_eq!(store.uploads().len(), 3);
    }

    #[tokio::test]
    async fn manifest_never_gains_duplicates_across_runs() {
        let fx = fixture(&["a.txt", "sub/b.txt"]);

        // A fresh store each time: only the manifest prevents re-uploads.
        for _ in 0..3 {
            let store = MemoryStore::default();
            sync(&store, &fx, SyncOptions::default()).await.unwrap();
        }

        assert_eq!(manifest_keys(&fx.manifest_path), ["a.txt", "sub/b.txt"]);
    }

    #[tokio::test]
    async fn manifest_entries_skip_files_missing_from_bucket() {
        let fx = fixture(&["a.txt", "sub/b.txt"]);
        let manifest: Manifest = std::iter::once(RemoteKey::from("a.txt")).collect();
        manifest.save(&fx.manifest_path).unwrap();
        let store = MemoryStore::default();

        let stats = sync(&store, &fx, SyncOptions::default()).await.unwrap();

        assert_eq!(store.uploads(), ["sub/b.txt"]);
        assert_eq!(stats.skipped_manifest, 1);
        assert_eq!(manifest_keys(&fx.manifest_path), ["a.txt", "sub/b.txt"]);
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_any_upload() {
        let fx = fixture(&["a.txt"]);
        let manifest: Manifest = std::iter::once(RemoteKey::from("old.txt")).collect();
        manifest.save(&fx.manifest_path).unwrap();
        let before = fs::read(&fx.manifest_path).unwrap();

        let store = MemoryStore {
            fail_listing: true,
            ..MemoryStore::default()
        };
        let err = sync(&store, &fx, SyncOptions::default()).await.unwrap_err();

        assert!(matches!(err, SyncError::Inventory(_)), "got {err:?}");
        assert!(store.uploads().is_empty());
        assert_eq!(fs::read(&fx.manifest_path).unwrap(), before);
    }

    #[tokio::test]
    async fn failed_upload_is_not_recorded() {
        let fx = fixture(&["a.txt", "b.txt", "c.txt"]);
        let store = MemoryStore {
            reject_keys: HashSet::from(["b.txt".to_string()]),
            ..MemoryStore::default()
        };

        let err = sync(&store, &fx, SyncOptions::default()).await.unwrap_err();

        assert!(matches!(err, SyncError::Upload(_)), "got {err:?}");
        assert_eq!(store.uploads(), ["a.txt"]);
        // End-of-run saving: nothing reached disk.
        assert!(!fx.manifest_path.exists());
    }

    #[tokio::test]
    async fn per_upload_saving_keeps_progress_made_before_a_failure() {
        let fx = fixture(&["a.txt", "b.txt", "c.txt"]);
        let store = MemoryStore {
            reject_keys: HashSet::from(["b.txt".to_string()]),
            ..MemoryStore::default()
        };
        let options = SyncOptions {
            save_policy: SavePolicy::AfterEachUpload,
            ..SyncOptions::default()
        };

        sync(&store, &fx, options).await.unwrap_err();

        assert_eq!(manifest_keys(&fx.manifest_path), ["a.txt"]);
    }

    #[tokio::test]
    async fn dry_run_uploads_nothing_and_leaves_manifest_alone() {
        let fx = fixture(&["a.txt", "sub/b.txt"]);
        let store = MemoryStore::with_objects(&["a.txt"]);
        let options = SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        };

        let stats = sync(&store, &fx, options).await.unwrap();

        assert!(store.uploads().is_empty());
        assert_eq!(stats.uploaded, 1);
        assert_eq!(stats.skipped_remote, 1);
        assert!(!fx.manifest_path.exists());
    }

    #[tokio::test]
    async fn uploads_use_configured_storage_tier() {
        let fx = fixture(&["a.txt"]);
        let store = MemoryStore::default();
        let options = SyncOptions {
            storage_tier: StorageTier::GlacierIr,
            ..SyncOptions::default()
        };

        sync(&store, &fx, options).await.unwrap();

        assert_eq!(
            store.objects.lock().unwrap().get("a.txt"),
            Some(&StorageTier::GlacierIr)
        );
    }

    #[tokio::test]
    async fn missing_root_is_a_walk_error() {
        let fx = fixture(&[]);
        let store = MemoryStore::default();

        let err = run(
            &store,
            &fx.root.join("missing"),
            &fx.manifest_path,
            SyncOptions::default(),
            &null_progress(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Walk(_)), "got {err:?}");
        assert!(!fx.manifest_path.exists());
    }

    #[cfg(unix)]
    fn write_non_utf8(root: &Path, name: &[u8]) {
        use std::os::unix::ffi::OsStrExt;

        fs::write(root.join(std::ffi::OsStr::from_bytes(name)), b"abc").unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_name_aborts_the_run_without_recording_it() {
        let fx = fixture(&["a.txt"]);
        write_non_utf8(&fx.root, b"f\xfe.txt");
        write_non_utf8(&fx.root, b"f\xff.txt");
        let store = MemoryStore::default();

        let err = sync(&store, &fx, SyncOptions::default()).await.unwrap_err();

        assert!(
            matches!(err, SyncError::Walk(WalkError::NonUtf8Path { .. })),
            "got {err:?}"
        );
        assert_eq!(store.uploads(), ["a.txt"]);
        assert!(!fx.manifest_path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn distinct_non_utf8_names_are_never_reported_as_archived() {
        let fx = fixture(&["a.txt"]);
        write_non_utf8(&fx.root, b"f\xfe.txt");
        write_non_utf8(&fx.root, b"f\xff.txt");
        let store = MemoryStore::default();

        let options = SyncOptions {
            walk_policy: WalkErrorPolicy::SkipUnreadable,
            ..SyncOptions::default()
        };
        let stats = sync(&store, &fx, options).await.unwrap();

        assert_eq!(store.uploads(), ["a.txt"]);
        assert_eq!(stats.uploaded, 1);
        assert_eq!(stats.skipped_manifest, 0);
        assert_eq!(manifest_keys(&fx.manifest_path), ["a.txt"]);
    }

    #[test]
    fn bucket_inventory_wins_over_manifest() {
        let store = MemoryStore::default();
        let inventory: RemoteInventory =
            ["both", "remote"].into_iter().map(String::from).collect();
        let manifest: Manifest = ["both", "local"]
            .into_iter()
            .map(RemoteKey::from)
            .collect();
        let reconciler = Reconciler::new(
            &store,
            inventory,
            manifest,
            Path::new("unused.json"),
            SyncOptions::default(),
        );

        assert_eq!(
            reconciler.decide(&RemoteKey::from("both")),
            Decision::Skip(SkipReason::InRemote)
        );
        assert_eq!(
            reconciler.decide(&RemoteKey::from("remote")),
            Decision::Skip(SkipReason::InRemote)
        );
        assert_eq!(
            reconciler.decide(&RemoteKey::from("local")),
            Decision::Skip(SkipReason::InManifest)
        );
        assert_eq!(reconciler.decide(&RemoteKey::from("new")), Decision::Upload);
    }

    #[tokio::test]
    async fn uploaded_key_is_skipped_if_seen_again_in_the_same_run() {
        let fx = fixture(&["a.txt"]);
        let store = MemoryStore::default();
        let mut reconciler = Reconciler::new(
            &store,
            RemoteInventory::default(),
            Manifest::new(),
            &fx.manifest_path,
            SyncOptions::default(),
        );
        let candidate = FileCandidate {
            path: fx.root.join("a.txt"),
            key: RemoteKey::from("a.txt"),
            size: 5,
        };

        assert_eq!(
            reconciler.process(candidate.clone()).await.unwrap(),
            Decision::Upload
        );
        assert_eq!(
            reconciler.process(candidate).await.unwrap(),
            Decision::Skip(SkipReason::InManifest)
        );
        assert_eq!(store.uploads(), ["a.txt"]);
        assert_eq!(reconciler.manifest().len(), 1);
        assert_eq!(reconciler.stats().total(), 2);
    }
}
