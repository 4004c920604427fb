use crate::types::{ChangeStamp, DocumentRecord, EventType, Result};
use std::collections::HashMap;
use std::fmt;

/// Outcome of comparing one incoming note against what the sensor already accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Never seen before.
    New,
    /// Seen, and the incoming change stamp is strictly newer.
    Update { previous: ChangeStamp },
    /// Nothing to emit this cycle.
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Incoming stamp is equal to or older than the stored one.
    NotNewer { stored: ChangeStamp, incoming: ChangeStamp },
    /// Stamp moved but the contents hash equals the last emitted bundle.
    SameFingerprint,
    /// Payload failed normalization.
    Invalid(String),
}

impl Classification {
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            Classification::New => Some(EventType::New),
            Classification::Update { .. } => Some(EventType::Update),
            Classification::Skip(_) => None,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotNewer { stored, incoming } => {
                write!(f, "not newer (stored {}, incoming {})", stored, incoming)
            }
            SkipReason::SameFingerprint => f.write_str("contents unchanged since last emission"),
            SkipReason::Invalid(reason) => write!(f, "invalid payload: {}", reason),
        }
    }
}

/// Last emitted contents hash per identity key. Lives for the process only;
/// the timestamp index in the state store is what survives restarts.
#[derive(Debug, Default)]
pub struct BundleCache {
    fingerprints: HashMap<String, String>,
}

impl BundleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fingerprints.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: String, fingerprint: String) {
        self.fingerprints.insert(key, fingerprint);
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// Change-detection state machine: UNKNOWN -> NEW, KNOWN and newer -> UPDATE, otherwise SKIP.
/// Equal stamps count as duplicates, which makes replaying a payload harmless.
#[derive(Debug, Clone)]
pub struct Classifier {
    cross_check_fingerprints: bool,
}

impl Classifier {
    pub fn new(cross_check_fingerprints: bool) -> Self {
        Self { cross_check_fingerprints }
    }

    /// `stored` is the state store's stamp for the record's key. `fingerprint` is the
    /// incoming contents hash and `emitted` the hash of the last bundle emitted for the key;
    /// both are only consulted when fingerprint cross-checking is on.
    pub fn classify(
        &self,
        normalized: &Result<DocumentRecord>,
        stored: Option<ChangeStamp>,
        fingerprint: Option<&str>,
        emitted: Option<&str>,
    ) -> Classification {
        let record = match normalized {
            Ok(record) => record,
            Err(e) => return Classification::Skip(SkipReason::Invalid(e.to_string())),
        };

        let incoming = record.change_stamp();
        let Some(stored) = stored else {
            return Classification::New;
        };

        if incoming <= stored {
            return Classification::Skip(SkipReason::NotNewer { stored, incoming });
        }

        if self.cross_check_fingerprints {
            if let (Some(current), Some(previous)) = (fingerprint, emitted) {
                if current == previous {
                    return Classification::Skip(SkipReason::SameFingerprint);
                }
            }
        }

        Classification::Update { previous: stored }
    }
}
