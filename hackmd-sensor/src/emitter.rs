use crate::types::{DocumentRecord, EventType, KnowledgeEvent, Result, SensorError};
use interfaces::KnowledgeSink;
use std::sync::Arc;
use tracing::debug;

/// Wraps accepted records as knowledge events and hands them to the downstream processor.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn KnowledgeSink>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn KnowledgeSink>) -> Self {
        Self { sink }
    }

    /// Bundles `record` with a manifest (rid, generation time, contents hash).
    pub fn bundle(record: &DocumentRecord, event_type: EventType) -> Result<KnowledgeEvent> {
        Ok(KnowledgeEvent::generate(record.rid(), event_type, record.to_contents()?))
    }

    /// Pushes one event. The pipeline decides what a failure means for state.
    pub async fn emit(&self, event: KnowledgeEvent) -> Result<()> {
        let rid = event.rid.to_string();
        let event_type = event.event_type;
        self.sink.push(event).await.map_err(|e| SensorError::Emit {
            rid: rid.clone(),
            reason: e.to_string(),
        })?;
        debug!("Emitted {} event for {}", event_type, rid);
        Ok(())
    }
}
