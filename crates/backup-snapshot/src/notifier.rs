//! Delivery of snapshot events to people.
//!

use tracing::info;

/// Receives human-readable snapshot events. Who sees them is up to the implementation.
pub trait Notifier: Send + Sync {
    /// Deliver a message.
    fn notify(&self, message: &str);
}

/// Writes every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!("[Notify] {message}");
    }
}
