//! Progress reporting for export runs.
//!
//! [`ProgressCallback`] decouples stage-level progress from any
//! rendering backend. The CLI binary provides an `indicatif`-backed
//! implementation; library callers and tests use [`NullProgress`].

/// Trait for reporting progress from an export run.
///
/// Implementations must be `Send + Sync` so a single callback can be
/// shared through `Arc`.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// A no-op [`ProgressCallback`] that silently ignores all updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}
