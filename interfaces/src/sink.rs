use anyhow::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::defs::KnowledgeEvent;

/// Push interface of the downstream knowledge processor.
///
/// Delivery is at-least-once: the same logical change can arrive twice after a
/// crash, so implementations must be idempotent (the manifest hash is a good key).
#[async_trait]
pub trait KnowledgeSink: Send + Sync {
    async fn push(&self, event: KnowledgeEvent) -> Result<()>;
}

/// Forwards events into an unbounded channel, for a processor running in another task.
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<KnowledgeEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<KnowledgeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl KnowledgeSink for ChannelSink {
    async fn push(&self, event: KnowledgeEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|e| anyhow!("knowledge processor is gone, dropped {}", e.0.rid))
    }
}

/// Logs every event and drops it. Stands in for the processor when running standalone.
pub struct LogSink;

#[async_trait]
impl KnowledgeSink for LogSink {
    async fn push(&self, event: KnowledgeEvent) -> Result<()> {
        info!(
            "Knowledge event {} for {} (sha256 {})",
            event.event_type, event.rid, event.manifest.sha256_hash
        );
        Ok(())
    }
}
