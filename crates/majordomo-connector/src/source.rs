//! The source seam.
//!
//! Source-native adapters (Telegram long-poll, Gmail sync, IMAP idle)
//! implement [`MessageSource`]; the runtime drives them. A channel-backed
//! source ships here for tests and in-process producers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use majordomo_core::IngestEnvelope;

/// One normalized item read from a source.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// The envelope to submit.
    pub envelope: IngestEnvelope,
    /// Cursor that becomes safe once this item (and everything before it)
    /// is accepted.
    pub cursor: String,
}

/// Why a read failed.
#[derive(Debug)]
pub enum SourceError {
    /// Back off and retry; honor `retry_after` when the source names one.
    Transient {
        /// What went wrong.
        reason: String,
        /// Source-provided retry hint.
        retry_after: Option<Duration>,
    },
    /// The source is gone for good; the connector degrades.
    Persistent(String),
}

/// A readable external source.
#[async_trait]
pub trait MessageSource: Send {
    /// Read the next batch, resuming after `cursor`. An empty batch means
    /// nothing new; the runtime idles briefly and polls again.
    async fn read_batch(
        &mut self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceItem>, SourceError>;
}

/// A source fed through an in-process channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<SourceItem>,
}

impl ChannelSource {
    /// Create a channel source and its feeding half.
    #[must_use]
    pub fn new(capacity: usize) -> (mpsc::Sender<SourceItem>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn read_batch(
        &mut self,
        _cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceItem>, SourceError> {
        let mut batch = Vec::new();
        // Block for the first item, then drain whatever else is ready.
        match self.rx.recv().await {
            Some(item) => batch.push(item),
            None => {
                return Err(SourceError::Persistent("source channel closed".to_owned()));
            },
        }
        while batch.len() < limit {
            match self.rx.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
        Ok(batch)
    }
}
