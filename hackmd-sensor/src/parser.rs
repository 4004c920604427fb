use crate::types::{ChangeStamp, DocumentRecord, NoteAuthor, RawPayload, Result, SensorError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

/// Turns raw API payloads into `DocumentRecord`s. Only the note id is mandatory;
/// every other field falls back to a default.
pub struct NoteParser {
    workspace_id: Option<String>,
}

impl NoteParser {
    /// `workspace_id` is the configured team path; when set it scopes every note,
    /// otherwise the payload's own `teamPath` is used.
    pub fn new(workspace_id: Option<String>) -> Self {
        Self {
            workspace_id: workspace_id.filter(|ws| !ws.is_empty()),
        }
    }

    pub fn normalize(&self, payload: &RawPayload) -> Result<DocumentRecord> {
        let note_id = match payload.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err(SensorError::Validation("note id is empty or not a string".to_string())),
            None => return Err(SensorError::Validation("note id is missing".to_string())),
        };

        let workspace_id = self
            .workspace_id
            .clone()
            .or_else(|| string_field(payload, "teamPath"));

        let record = DocumentRecord {
            title: string_field(payload, "title").unwrap_or_else(|| "Untitled".to_string()),
            content: string_field(payload, "content"),
            tags: tags_field(payload),
            created_at: stamp_field(payload, "createdAt"),
            last_changed_at: stamp_field(payload, "lastChangedAt"),
            title_updated_at: stamp_field(payload, "titleUpdatedAt"),
            tags_updated_at: stamp_field(payload, "tagsUpdatedAt"),
            published_at: stamp_field(payload, "publishedAt"),
            publish_type: string_field(payload, "publishType"),
            permalink: string_field(payload, "permalink"),
            publish_link: string_field(payload, "publishLink"),
            short_id: string_field(payload, "shortId"),
            // The list endpoint calls the owner `ownerPath`
            user_path: string_field(payload, "userPath").or_else(|| string_field(payload, "ownerPath")),
            last_change_user: payload.get("lastChangeUser").and_then(parse_author),
            note_id,
            workspace_id,
        };

        debug!("Normalized note {} (changed at {})", record.state_key(), record.change_stamp());
        Ok(record)
    }
}

fn string_field(payload: &RawPayload, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

fn stamp_field(payload: &RawPayload, field: &str) -> Option<ChangeStamp> {
    let value = payload.get(field)?;
    let stamp = parse_timestamp(value);
    if stamp.is_none() && !value.is_null() {
        warn!("Ignoring unparseable {} value {}", field, value);
    }
    stamp
}

fn tags_field(payload: &RawPayload) -> Vec<String> {
    match payload.get("tags") {
        Some(Value::Array(tags)) => tags
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_author(value: &Value) -> Option<NoteAuthor> {
    let user = value.as_object()?;
    let field = |name: &str| user.get(name).and_then(Value::as_str).map(str::to_string);
    Some(NoteAuthor {
        name: field("name")?,
        user_path: field("userPath"),
        photo: field("photo"),
        biography: field("biography"),
    })
}

/// Coerces the timestamp shapes the API (and older state files) use into a `ChangeStamp`:
/// epoch-millis numbers or digit strings, and ISO-8601 strings with or without an offset.
/// A missing offset means UTC. Zero, null, and empty strings mean "absent".
pub fn parse_timestamp(value: &Value) -> Option<ChangeStamp> {
    let stamp = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .map(ChangeStamp::from_millis),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }?;
    (stamp != ChangeStamp::EPOCH).then_some(stamp)
}

fn parse_timestamp_str(s: &str) -> Option<ChangeStamp> {
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().map(ChangeStamp::from_millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(ChangeStamp::from_datetime(dt.with_timezone(&Utc)));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| ChangeStamp::from_datetime(naive.and_utc()))
}
