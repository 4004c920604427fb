use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub use interfaces::defs::{EventType, KnowledgeEvent, Manifest, NoteRid};

/// Canonical ordinal for every timestamp the API hands out: milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeStamp(i64);

impl ChangeStamp {
    pub const EPOCH: ChangeStamp = ChangeStamp(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl fmt::Display for ChangeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One note as returned by the API, list or single endpoint alike.
/// The parser is the only place that interprets its fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPayload(Map<String, Value>);

impl RawPayload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Note id when present as a non-empty string.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())
    }

    /// List endpoints omit `content` entirely; a null body counts as missing too.
    pub fn has_content(&self) -> bool {
        matches!(self.0.get("content"), Some(v) if !v.is_null())
    }

    pub fn set_content(&mut self, content: String) {
        self.0.insert("content".to_string(), Value::String(content));
    }
}

impl TryFrom<Value> for RawPayload {
    type Error = SensorError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(SensorError::Validation(format!(
                "expected a JSON object for a note, got {}",
                json_kind(&other)
            ))),
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteAuthor {
    pub name: String,
    pub user_path: Option<String>,
    pub photo: Option<String>,
    pub biography: Option<String>,
}

/// Canonical, immutable view of one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    #[serde(rename = "id")]
    pub note_id: String,
    #[serde(rename = "teamPath")]
    pub workspace_id: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub tags: Vec<String>,
    pub created_at: Option<ChangeStamp>,
    pub last_changed_at: Option<ChangeStamp>,
    pub title_updated_at: Option<ChangeStamp>,
    pub tags_updated_at: Option<ChangeStamp>,
    pub published_at: Option<ChangeStamp>,
    pub publish_type: Option<String>,
    pub permalink: Option<String>,
    pub publish_link: Option<String>,
    pub short_id: Option<String>,
    pub user_path: Option<String>,
    pub last_change_user: Option<NoteAuthor>,
}

impl DocumentRecord {
    pub fn rid(&self) -> NoteRid {
        NoteRid::new(self.note_id.clone(), self.workspace_id.clone())
    }

    pub fn state_key(&self) -> String {
        self.rid().state_key()
    }

    /// Stamp used for change detection: last change, else creation, else the epoch.
    pub fn change_stamp(&self) -> ChangeStamp {
        self.last_changed_at
            .or(self.created_at)
            .unwrap_or(ChangeStamp::EPOCH)
    }

    pub fn to_contents(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Hash of the full contents, timestamps included. Equal to the manifest hash of the
    /// event this record would be bundled into.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(interfaces::content_fingerprint(&self.to_contents()?))
    }
}

/// Which notes a poll looks at. Only one is active per configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchScope {
    /// Explicit note ids, fetched one by one.
    Notes(Vec<String>),
    /// All notes of a team workspace.
    Workspace(String),
    /// Notes of the account that owns the API token.
    Account,
}

impl fmt::Display for FetchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchScope::Notes(ids) => write!(f, "{} explicit note(s)", ids.len()),
            FetchScope::Workspace(ws) => write!(f, "workspace {}", ws),
            FetchScope::Account => f.write_str("account notes"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid note payload: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to emit {rid}: {reason}")]
    Emit { rid: String, reason: String },

    #[error("Poll cycle aborted: {0}")]
    Cycle(String),
}

/// Statuses worth another attempt: rate limiting and server-side trouble.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

impl SensorError {
    /// Whether the fetch layer should retry after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            SensorError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            SensorError::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SensorError>;
