//! Decouples the engine and downloader from terminal rendering.
//!
//! The segmented downloader's writer task is the sole caller of
//! [`ProgressSink`] methods (see the crate-level docs on why that matters
//! for the "single writer" invariant); a transport's `get` without
//! segmentation calls it directly instead.

use std::sync::Arc;

/// Receives download progress. Implementations must be cheap to call --
/// they're invoked on every flushed sub-chunk.
pub trait ProgressSink: Send + Sync {
    /// A download with a known total size just flushed `delta` more bytes,
    /// bringing the cumulative total to `current` out of `total`.
    fn on_progress(&self, current: u64, total: u64) {
        let _ = (current, total);
    }
    /// A download with no known total (chunked transfer-encoding) just
    /// flushed `delta` more bytes.
    fn on_progress_unknown_total(&self, delta: u64) {
        let _ = delta;
    }
    /// The download finished (successfully or not).
    fn on_finish(&self) {}
}

/// Does nothing; the default for library embedders and tests.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

/// Shared handle type used everywhere a sink is threaded through.
pub type SharedProgressSink = Arc<dyn ProgressSink>;

/// Wraps [`NoopProgress`] in the shared handle type `Transport`/`SegmentedDownloader`
/// callers expect.
pub fn noop() -> SharedProgressSink {
    Arc::new(NoopProgress)
}
