use crate::config::SensorConfig;
use crate::pipeline::{IngestionPipeline, PollReport};
use crate::types::{Result, SensorError};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Where the poll loop is. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Polling,
    Sleeping,
    /// Waiting out the recovery delay after a failed cycle.
    Recovering,
    Stopped,
}

/// Point-in-time view for health checks.
#[derive(Debug, Clone, Serialize)]
pub struct SensorStatus {
    pub phase: SchedulerPhase,
    pub tracked_notes: usize,
    pub consecutive_failures: u32,
    pub last_report: Option<PollReport>,
}

/// Drives `IngestionPipeline::poll_once` on a fixed period until cancelled.
///
/// Cancellation is observed before each batch and during the sleep between batches,
/// never inside a batch, so the state file is only ever written for complete batches.
pub struct Scheduler {
    pipeline: Arc<IngestionPipeline>,
    poll_interval: Duration,
    recovery_delay: Duration,
    phase: watch::Sender<SchedulerPhase>,
    last_report: RwLock<Option<PollReport>>,
    consecutive_failures: AtomicU32,
}

impl Scheduler {
    pub fn new(pipeline: Arc<IngestionPipeline>, poll_interval: Duration, recovery_delay: Duration) -> Self {
        let (phase, _) = watch::channel(SchedulerPhase::Idle);
        Self {
            pipeline,
            poll_interval,
            recovery_delay,
            phase,
            last_report: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn from_config(pipeline: Arc<IngestionPipeline>, config: &SensorConfig) -> Self {
        Self::new(pipeline, config.poll_interval(), config.recovery_delay())
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    /// Phase changes as they happen.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase.subscribe()
    }

    pub async fn status(&self) -> SensorStatus {
        let tracked_notes = self.pipeline.state().read().await.len();
        SensorStatus {
            phase: self.phase(),
            tracked_notes,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_report: self.last_report.read().await.clone(),
        }
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        debug!("Scheduler phase -> {:?}", phase);
        self.phase.send_replace(phase);
    }

    /// Runs the batch in its own task so a panic surfaces as an error here
    /// instead of taking the loop down.
    async fn run_cycle(&self) -> Result<PollReport> {
        let pipeline = self.pipeline.clone();
        match tokio::spawn(async move { pipeline.poll_once().await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(SensorError::Cycle("batch panicked".to_string())),
            Err(e) => Err(SensorError::Cycle(e.to_string())),
        }
    }

    /// Polls until `token` is cancelled. A failed cycle is logged and followed by the
    /// recovery delay instead of the poll interval; nothing here ends the loop but the token.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "HackMD ingestion started for {}; interval={:?}",
            self.pipeline.scope(),
            self.poll_interval
        );

        while !token.is_cancelled() {
            self.set_phase(SchedulerPhase::Polling);
            let started = Instant::now();

            let wait = match self.run_cycle().await {
                Ok(report) => {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    *self.last_report.write().await = Some(report);
                    self.set_phase(SchedulerPhase::Sleeping);
                    self.poll_interval.saturating_sub(started.elapsed())
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    error!(
                        "Ingestion poll failed ({} in a row), retrying in {:?}: {}",
                        failures, self.recovery_delay, e
                    );
                    self.set_phase(SchedulerPhase::Recovering);
                    self.recovery_delay
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.set_phase(SchedulerPhase::Stopped);
        info!("HackMD ingestion stopped");
    }
}
