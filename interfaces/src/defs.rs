use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;

pub const NOTE_RID_PREFIX: &str = "orn:hackmd.note:";

/// Stable identity of a HackMD note: the note id scoped by an optional workspace (team path).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteRid {
    pub workspace_id: Option<String>,
    pub note_id: String,
}

impl NoteRid {
    pub fn new(note_id: impl Into<String>, workspace_id: Option<String>) -> Self {
        Self {
            note_id: note_id.into(),
            workspace_id: workspace_id.filter(|ws| !ws.is_empty()),
        }
    }

    /// `"<workspace>/<note>"`, or the bare note id when unscoped.
    pub fn state_key(&self) -> String {
        match &self.workspace_id {
            Some(ws) => format!("{}/{}", ws, self.note_id),
            None => self.note_id.clone(),
        }
    }

    pub fn reference(&self) -> String {
        format!("{}{}", NOTE_RID_PREFIX, self.state_key())
    }

    /// Inverse of `reference`. The first `/` separates workspace from note id.
    pub fn from_reference(reference: &str) -> Option<Self> {
        let key = reference.strip_prefix(NOTE_RID_PREFIX)?;
        match key.split_once('/') {
            Some((ws, note)) if !note.is_empty() => Some(Self::new(note, Some(ws.to_owned()))),
            Some(_) => None,
            None if !key.is_empty() => Some(Self::new(key, None)),
            None => None,
        }
    }
}

impl fmt::Display for NoteRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    New,
    Update,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::New => f.write_str("NEW"),
            EventType::Update => f.write_str("UPDATE"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub rid: NoteRid,
    pub timestamp: DateTime<Utc>,
    pub sha256_hash: String,
}

impl Manifest {
    pub fn generate(rid: NoteRid, contents: &Value) -> Self {
        Self {
            rid,
            timestamp: Utc::now(),
            sha256_hash: content_fingerprint(contents),
        }
    }
}

/// Lowercase hex SHA-256 of the contents' JSON.
///
/// `serde_json::Map` keeps keys sorted, so two equal values always hash the same.
pub fn content_fingerprint(contents: &Value) -> String {
    let canonical = contents.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// The unit handed to the downstream knowledge processor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnowledgeEvent {
    pub rid: NoteRid,
    pub event_type: EventType,
    pub manifest: Manifest,
    pub contents: Value,
}

impl KnowledgeEvent {
    pub fn generate(rid: NoteRid, event_type: EventType, contents: Value) -> Self {
        let manifest = Manifest::generate(rid.clone(), &contents);
        Self {
            rid,
            event_type,
            manifest,
            contents,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.manifest.sha256_hash
    }
}
