//! Outbound delivery seam.
//!
//! The `notify` tool resolves a recipient, hands the message to a
//! [`Notifier`], and records the attempt. Concrete channel egress
//! (Telegram sends, SMTP) lives with the connectors; the default
//! [`LogNotifier`] just logs, which is what headless test rigs want.

use async_trait::async_trait;
use tracing::info;

/// Delivers a message on a channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` to `recipient` on `channel`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason on failure; the caller records it
    /// on the notification row.
    async fn deliver(&self, channel: &str, recipient: &str, message: &str) -> Result<(), String>;
}

/// Logs deliveries instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, channel: &str, recipient: &str, message: &str) -> Result<(), String> {
        info!(channel, recipient, message, "outbound delivery (log only)");
        Ok(())
    }
}
