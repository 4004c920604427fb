use crate::classifier::{BundleCache, Classification, Classifier, SkipReason};
use crate::config::SensorConfig;
use crate::emitter::Emitter;
use crate::fetcher::Fetcher;
use crate::parser::NoteParser;
use crate::state::StateStore;
use crate::traits::NoteSource;
use crate::types::{FetchScope, Result};
use interfaces::KnowledgeSink;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counts for one completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub cycle_id: Uuid,
    pub fetched: usize,
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub emit_failures: usize,
    pub flushed: bool,
}

impl PollReport {
    pub fn emitted(&self) -> usize {
        self.new + self.updated
    }
}

/// One fetch -> normalize -> classify -> emit -> flush batch.
///
/// State is advanced in memory per emitted note and written once at the end of the
/// batch. A crash in between re-emits those notes on the next start (at-least-once).
pub struct IngestionPipeline {
    source: Arc<dyn NoteSource>,
    scope: FetchScope,
    max_notes: usize,
    parser: NoteParser,
    classifier: Classifier,
    emitter: Emitter,
    state: Arc<RwLock<StateStore>>,
    emitted: RwLock<BundleCache>,
    batch_lock: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn NoteSource>,
        scope: FetchScope,
        max_notes: usize,
        parser: NoteParser,
        classifier: Classifier,
        emitter: Emitter,
        state: StateStore,
    ) -> Self {
        Self {
            source,
            scope,
            max_notes,
            parser,
            classifier,
            emitter,
            state: Arc::new(RwLock::new(state)),
            emitted: RwLock::new(BundleCache::new()),
            batch_lock: Mutex::new(()),
        }
    }

    /// Production wiring: HTTP fetcher for the configured scope and the state file at
    /// `config.state_path`, loaded now.
    pub async fn from_config(config: &SensorConfig, sink: Arc<dyn KnowledgeSink>) -> Result<Self> {
        let fetcher = Fetcher::new(config)?;
        let state = StateStore::load(&config.state_path).await;
        Ok(Self::new(
            Arc::new(fetcher),
            config.scope(),
            config.max_notes_per_poll,
            NoteParser::new(config.workspace_id.clone()),
            Classifier::new(config.fingerprint_cross_check),
            Emitter::new(sink),
            state,
        ))
    }

    /// Shared handle for read-only observers. Only `poll_once` writes through it.
    pub fn state(&self) -> Arc<RwLock<StateStore>> {
        self.state.clone()
    }

    pub fn scope(&self) -> &FetchScope {
        &self.scope
    }

    /// Runs one batch. Batches never overlap: a second caller waits for the first to finish.
    ///
    /// Only a failure to list notes fails the batch; per-note problems are logged,
    /// counted, and skipped.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let _batch = self.batch_lock.lock().await;
        let mut report = PollReport {
            cycle_id: Uuid::new_v4(),
            ..Default::default()
        };

        info!("Polling {} for {} (cycle {})", self.source.source_name(), self.scope, report.cycle_id);
        let payloads = self.source.list_documents(&self.scope, self.max_notes).await?;
        report.fetched = payloads.len();

        for payload in payloads {
            let normalized = self.parser.normalize(&payload);
            let key = normalized.as_ref().ok().map(|record| record.state_key());
            let fingerprint = match &normalized {
                Ok(record) => record.fingerprint().ok(),
                Err(_) => None,
            };

            let classification = {
                let state = self.state.read().await;
                let emitted = self.emitted.read().await;
                let stored = key.as_deref().and_then(|k| state.get(k));
                let previous = key.as_deref().and_then(|k| emitted.get(k));
                self.classifier
                    .classify(&normalized, stored, fingerprint.as_deref(), previous)
            };

            let (record, event_type) = match (normalized, classification.event_type()) {
                (Ok(record), Some(event_type)) => (record, event_type),
                _ => {
                    let id = key.as_deref().or_else(|| payload.id()).unwrap_or("<no id>");
                    match &classification {
                        Classification::Skip(reason @ SkipReason::Invalid(_)) => {
                            warn!("normalize: skipping note {}: {}", id, reason);
                            report.invalid += 1;
                        }
                        Classification::Skip(reason) => {
                            debug!("classify: skipping note {}: {}", id, reason);
                            report.skipped += 1;
                        }
                        _ => {}
                    }
                    continue;
                }
            };

            let key = record.state_key();
            let stamp = record.change_stamp();

            let event = match Emitter::bundle(&record, event_type) {
                Ok(event) => event,
                Err(e) => {
                    warn!("emit: could not bundle note {}: {}", key, e);
                    report.emit_failures += 1;
                    continue;
                }
            };

            if let Err(e) = self.emitter.emit(event).await {
                // State stays where it was so the note is retried next poll.
                warn!("emit: {} for note {} failed: {}", event_type, key, e);
                report.emit_failures += 1;
                continue;
            }

            match classification {
                Classification::New => {
                    debug!("classify: note {} is new (changed at {})", key, stamp);
                    report.new += 1;
                }
                Classification::Update { previous } => {
                    debug!("classify: note {} changed {} -> {}", key, previous, stamp);
                    report.updated += 1;
                }
                Classification::Skip(_) => {}
            }

            self.state.write().await.set(&key, stamp);
            if let Some(fingerprint) = fingerprint {
                self.emitted.write().await.insert(key, fingerprint);
            }
        }

        let mut state = self.state.write().await;
        if state.is_dirty() {
            match state.flush().await {
                Ok(()) => report.flushed = true,
                Err(e) => warn!(
                    "flush: failed to write state file {}, keeping changes in memory: {}",
                    state.path().display(),
                    e
                ),
            }
        }
        drop(state);

        if report.emitted() > 0 {
            info!(
                "Cycle {}: fetched {}, emitted {} ({} new, {} updated), skipped {}, invalid {}, emit failures {}",
                report.cycle_id,
                report.fetched,
                report.emitted(),
                report.new,
                report.updated,
                report.skipped,
                report.invalid,
                report.emit_failures
            );
        } else {
            info!(
                "Cycle {}: no note changes detected ({} fetched, {} invalid, {} emit failures)",
                report.cycle_id, report.fetched, report.invalid, report.emit_failures
            );
        }

        Ok(report)
    }
}
