//! Progress reporting for collection sessions.
//!
//! [`ProgressCallback`] decouples session progress from any rendering
//! backend (an `indicatif` bar, plain log lines, or nothing). Rendering
//! implementations live in crates that pick a terminal strategy.

/// Receives coarse progress updates for a long-running collection.
///
/// Implementations must be `Send + Sync` so a single callback can be shared
/// behind an [`Arc`](std::sync::Arc) across the session.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total expected units of work (e.g., the record target).
    fn set_total(&self, total: u64);

    /// Sets the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Updates the message displayed alongside the indicator.
    fn set_message(&self, msg: String);

    /// Marks progress as complete with a final message.
    fn finish(&self, msg: String);
}
