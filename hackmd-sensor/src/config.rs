use crate::types::{FetchScope, Result, SensorError};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.hackmd.io/v1";
pub const DEFAULT_STATE_PATH: &str = "./state/hackmd_state.json";

/// Every option the sensor recognizes. Build with `SensorConfig::new` and adjust fields,
/// then call `validate` before handing it to the fetcher or scheduler.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Bearer token for the HackMD API. Required.
    pub api_token: String,
    pub api_base_url: String,
    /// Team path to poll. Ignored when `note_ids` is non-empty.
    pub workspace_id: Option<String>,
    /// Explicit allow-list. Takes priority over `workspace_id`.
    pub note_ids: Vec<String>,
    pub poll_interval_seconds: u64,
    pub max_notes_per_poll: usize,
    pub state_path: PathBuf,
    pub retries: u32,
    pub backoff_base_seconds: f64,
    pub backoff_max_seconds: f64,
    /// Pause after a failed cycle before polling again.
    pub recovery_delay_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Parallel body fetches when enriching list results.
    pub fetch_concurrency: usize,
    pub user_agent: String,
    /// Skip notes whose full contents hash matches the last emitted bundle for the same key.
    pub fingerprint_cross_check: bool,
}

impl SensorConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            workspace_id: None,
            note_ids: Vec::new(),
            poll_interval_seconds: 300,
            max_notes_per_poll: 100,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            retries: 3,
            backoff_base_seconds: 1.0,
            backoff_max_seconds: 10.0,
            recovery_delay_seconds: 5,
            connect_timeout_seconds: 30,
            request_timeout_seconds: 60,
            fetch_concurrency: 4,
            user_agent: format!("hackmd-sensor/{}", env!("CARGO_PKG_VERSION")),
            fingerprint_cross_check: true,
        }
    }

    /// Fail fast on anything that would only blow up later inside the poll loop.
    /// A backoff cap below the base is raised to the base rather than rejected.
    pub fn validate(mut self) -> Result<Self> {
        if self.api_token.trim().is_empty() {
            return Err(SensorError::Config("api_token is required".to_string()));
        }
        let base = Url::parse(&self.api_base_url)?;
        if base.cannot_be_a_base() {
            return Err(SensorError::Config(format!(
                "api_base_url {} cannot carry a path",
                self.api_base_url
            )));
        }
        if self.poll_interval_seconds == 0 {
            return Err(SensorError::Config("poll_interval_seconds must be positive".to_string()));
        }
        if self.max_notes_per_poll == 0 {
            return Err(SensorError::Config("max_notes_per_poll must be positive".to_string()));
        }
        if self.fetch_concurrency == 0 {
            return Err(SensorError::Config("fetch_concurrency must be positive".to_string()));
        }
        if !self.backoff_base_seconds.is_finite() || self.backoff_base_seconds <= 0.0 {
            return Err(SensorError::Config(format!(
                "backoff_base_seconds must be a positive number, got {}",
                self.backoff_base_seconds
            )));
        }
        if !self.backoff_max_seconds.is_finite() || self.backoff_max_seconds < self.backoff_base_seconds {
            self.backoff_max_seconds = self.backoff_base_seconds;
        }

        self.note_ids.retain(|id| !id.trim().is_empty());
        self.workspace_id = self.workspace_id.filter(|ws| !ws.trim().is_empty());
        Ok(self)
    }

    /// Allow-list first, then workspace, then the token owner's notes.
    pub fn scope(&self) -> FetchScope {
        if !self.note_ids.is_empty() {
            FetchScope::Notes(self.note_ids.clone())
        } else if let Some(ws) = &self.workspace_id {
            FetchScope::Workspace(ws.clone())
        } else {
            FetchScope::Account
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_secs(self.recovery_delay_seconds)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_base_seconds)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_max_seconds)
    }
}
