use crate::config::SensorConfig;
use crate::traits::NoteSource;
use crate::types::{json_kind, FetchScope, RawPayload, Result, SensorError};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use futures::stream::{self, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Exponential backoff with `[0.5, 1.5)` jitter: attempt `n` waits about
/// `min(max_delay, base_delay * 2^n)` scaled by a random factor.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SensorConfig) -> Self {
        Self {
            retries: config.retries,
            base_delay: config.backoff_base(),
            max_delay: config.backoff_max(),
        }
    }

    /// Upper bound on the number of requests for one logical GET.
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }

    fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.5,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

pub struct Fetcher {
    client: Client,
    base_url: Url,
    api_token: String,
    policy: RetryPolicy,
    concurrency: usize,
}

impl Fetcher {
    pub fn new(config: &SensorConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        let base_url = Url::parse(&config.api_base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SensorError::Config(format!("api_base_url {} cannot carry a path", base_url)));
        }

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
            policy: RetryPolicy::from_config(config),
            concurrency: config.fetch_concurrency.max(1),
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SensorError::Config(format!("api_base_url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// One request, no retries. Non-2xx statuses come back as `SensorError::Status`.
    async fn send_once(&self, url: &Url) -> Result<Value> {
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SensorError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// GET with the retry policy applied. Transient failures (timeouts, connection
    /// errors, 429 and 5xx) are retried; anything else fails on the spot.
    async fn get_json(&self, url: Url) -> Result<Value> {
        let mut backoff = self.policy.backoff();
        let mut attempt: u32 = 0;

        loop {
            match self.send_once(&url).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("GET {} succeeded after {} retries", url, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    debug!("GET {} failed permanently: {}", url, e);
                    return Err(e);
                }
                Err(e) => {
                    if attempt >= self.policy.retries {
                        error!("GET {} failed after {} retries: {}", url, attempt, e);
                        return Err(SensorError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt + 1,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = backoff.next_backoff().unwrap_or(self.policy.max_delay);
                    warn!(
                        "GET {} failed ({}), retrying in {:?} (attempt {}/{})",
                        url,
                        e,
                        delay,
                        attempt + 1,
                        self.policy.max_attempts()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn list_endpoint(&self, mut url: Url, limit: usize) -> Result<Vec<RawPayload>> {
        url.query_pairs_mut().append_pair("limit", &limit.to_string());

        let items = match self.get_json(url.clone()).await? {
            Value::Array(items) => items,
            other => {
                return Err(SensorError::Validation(format!(
                    "{} returned {} instead of a list of notes",
                    url,
                    json_kind(&other)
                )))
            }
        };

        let mut notes = Vec::with_capacity(items.len().min(limit));
        for item in items.into_iter().take(limit) {
            match RawPayload::try_from(item) {
                Ok(payload) => notes.push(payload),
                Err(e) => warn!("Dropping list entry from {}: {}", url, e),
            }
        }
        Ok(notes)
    }

    /// Full body of one note. A missing `content` field reads as an empty note.
    pub async fn get_note_content(&self, note_id: &str) -> Result<String> {
        let payload = self.get_document(note_id).await?;
        Ok(payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Fills in `content` for list entries that lack it. A failed fetch leaves that
    /// note with an empty body and does not affect the others.
    async fn enrich(&self, payloads: Vec<RawPayload>) -> Vec<RawPayload> {
        stream::iter(payloads)
            .map(|mut payload| async move {
                if payload.has_content() {
                    return payload;
                }
                let Some(note_id) = payload.id().map(str::to_owned) else {
                    return payload;
                };
                match self.get_note_content(&note_id).await {
                    Ok(content) => payload.set_content(content),
                    Err(e) => {
                        warn!("fetch: no body for note {}, using empty content: {}", note_id, e);
                        payload.set_content(String::new());
                    }
                }
                payload
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn fetch_allowlist(&self, note_ids: &[String], limit: usize) -> Vec<RawPayload> {
        stream::iter(note_ids.iter().take(limit).cloned())
            .map(|note_id: String| async move {
                let result = self.get_document(&note_id).await;
                (note_id, result)
            })
            .buffered(self.concurrency)
            .filter_map(|(note_id, result)| async move {
                match result {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!("fetch: skipping note {}: {}", note_id, e);
                        None
                    }
                }
            })
            .collect()
            .await
    }
}

#[async_trait]
impl NoteSource for Fetcher {
    fn source_name(&self) -> String {
        format!("HackMD API ({})", self.base_url)
    }

    async fn list_documents(&self, scope: &FetchScope, limit: usize) -> Result<Vec<RawPayload>> {
        debug!("Listing notes for {} (limit {})", scope, limit);

        let listed = match scope {
            FetchScope::Notes(note_ids) => self.fetch_allowlist(note_ids, limit).await,
            FetchScope::Workspace(workspace_id) => {
                let url = self.endpoint(&["teams", workspace_id.as_str(), "notes"])?;
                self.list_endpoint(url, limit).await?
            }
            FetchScope::Account => {
                let url = self.endpoint(&["notes"])?;
                self.list_endpoint(url, limit).await?
            }
        };

        let notes = self.enrich(listed).await;
        info!("Fetched {} notes for {}", notes.len(), scope);
        Ok(notes)
    }

    async fn get_document(&self, note_id: &str) -> Result<RawPayload> {
        let url = self.endpoint(&["notes", note_id])?;
        RawPayload::try_from(self.get_json(url).await?)
    }
}
