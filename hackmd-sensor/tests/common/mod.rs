#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use hackmd_sensor::{
    Classifier, Emitter, FetchScope, IngestionPipeline, NoteParser, NoteSource, RawPayload, Result,
    SensorError, StateStore,
};
use interfaces::{KnowledgeEvent, KnowledgeSink};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A note as the list endpoint would return it, body included.
pub fn note(id: &str, last_changed_at: i64) -> Value {
    note_with_body(id, last_changed_at, "# Meeting notes\n\n- first item")
}

pub fn note_with_body(id: &str, last_changed_at: i64, content: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Note {}", id),
        "content": content,
        "tags": ["koi", "notes"],
        "createdAt": 1,
        "lastChangedAt": last_changed_at,
        "userPath": "owner",
    })
}

/// In-memory note source whose contents and health tests can change between polls.
pub struct FixtureSource {
    notes: Mutex<Vec<Value>>,
    failing: AtomicBool,
    panic_next: AtomicBool,
    polls: AtomicUsize,
    delay: Duration,
}

impl FixtureSource {
    pub fn new(notes: Vec<Value>) -> Self {
        Self {
            notes: Mutex::new(notes),
            failing: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
            polls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Every listing takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_notes(&self, notes: Vec<Value>) {
        *self.notes.lock().unwrap() = notes;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The next listing panics; later ones behave normally.
    pub fn panic_once(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NoteSource for FixtureSource {
    fn source_name(&self) -> String {
        "fixture".to_string()
    }

    async fn list_documents(&self, _scope: &FetchScope, limit: usize) -> Result<Vec<RawPayload>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("fixture listing blew up");
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SensorError::Status {
                status: 503,
                url: "fixture://notes".to_string(),
            });
        }
        let notes = self.notes.lock().unwrap().clone();
        notes.into_iter().take(limit).map(RawPayload::try_from).collect()
    }

    async fn get_document(&self, note_id: &str) -> Result<RawPayload> {
        let found = self
            .notes
            .lock()
            .unwrap()
            .iter()
            .find(|n| n["id"] == note_id)
            .cloned();
        match found {
            Some(note) => RawPayload::try_from(note),
            None => Err(SensorError::Status {
                status: 404,
                url: format!("fixture://notes/{}", note_id),
            }),
        }
    }
}

/// Keeps every pushed event; can be switched to reject pushes.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<KnowledgeEvent>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<KnowledgeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<KnowledgeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl KnowledgeSink for RecordingSink {
    async fn push(&self, event: KnowledgeEvent) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("processor unavailable"));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub fn pipeline_with(
    source: Arc<FixtureSource>,
    sink: Arc<RecordingSink>,
    state: StateStore,
    cross_check: bool,
) -> IngestionPipeline {
    IngestionPipeline::new(
        source,
        FetchScope::Account,
        100,
        NoteParser::new(None),
        Classifier::new(cross_check),
        Emitter::new(sink),
        state,
    )
}

pub fn pipeline(source: Arc<FixtureSource>, sink: Arc<RecordingSink>, state: StateStore) -> IngestionPipeline {
    pipeline_with(source, sink, state, true)
}
