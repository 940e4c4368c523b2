//! Progress reporting for a sync run.
//!
//! The run only knows how many files it has handled, never how many are
//! left (the walk is lazy), so reporting is a counter plus a status
//! message. Rendering lives upstream in `cold_archive_cli_utils`.

use std::sync::Arc;

/// Receives progress updates from [`crate::run`].
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc`.
pub trait ProgressCallback: Send + Sync {
    /// Advance by `delta` processed files.
    fn inc(&self, delta: u64);

    /// Update the message shown alongside the counter.
    fn set_message(&self, msg: String);

    /// Mark the run as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
