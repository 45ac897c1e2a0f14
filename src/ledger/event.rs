//! Ledger Event
//!
//! Defines the structure for tamper-evident ledger events
//! and the hash that links each event to its predecessor.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, Result};

/// `prev_hash` of the first event in the chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// Fields covered by `event_hash`, in hashing order.
pub const HASHED_FIELDS: &[&str] = &[
    "prev_hash",
    "created_at",
    "event_type",
    "entity_type",
    "entity_id",
    "payload",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const FIELD_DELIMITER: char = '|';

/// A stored ledger event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEvent {
    /// Store-assigned insertion order; tiebreak for equal `created_at`.
    pub seq: i64,
    pub event_id: String,
    pub created_at: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    /// Canonical JSON text exactly as hashed.
    pub payload_json: String,
    pub prev_hash: String,
    pub event_hash: String,
}

impl LedgerEvent {
    /// Recompute the hash from the stored fields.
    pub fn compute_hash(&self) -> String {
        compute_event_hash(
            &self.prev_hash,
            &self.created_at,
            &self.event_type,
            &self.entity_type,
            &self.entity_id,
            &self.payload_json,
        )
    }

    /// Verify this event's hash
    pub fn verify_hash(&self) -> bool {
        self.event_hash == self.compute_hash()
    }

    pub fn payload(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.payload_json)?)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} {} {}:{} ({})",
            self.created_at,
            self.event_type,
            self.entity_type,
            self.entity_id,
            short_hash(&self.event_hash)
        )
    }
}

/// Material is `prev|created_at|event_type|entity_type|entity_id|payload`.
pub fn compute_event_hash(
    prev_hash: &str,
    created_at: &str,
    event_type: &str,
    entity_type: &str,
    entity_id: &str,
    payload_json: &str,
) -> String {
    let material = [
        prev_hash,
        created_at,
        event_type,
        entity_type,
        entity_id,
        payload_json,
    ]
    .join("|");
    sha256_hex(material.as_bytes())
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Deterministic JSON: keys sorted at every level, no insignificant
/// whitespace, non-ASCII emitted verbatim.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&sort_keys(value))?)
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a ledger timestamp, accepting only the exact canonical form.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let parsed = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| LedgerError::validation(format!("invalid timestamp {:?}: {}", s, e)))?
        .and_utc();
    if format_timestamp(&parsed) != s {
        return Err(LedgerError::validation(format!(
            "timestamp {:?} is not in canonical YYYY-MM-DDTHH:MM:SSZ form",
            s
        )));
    }
    Ok(parsed)
}

/// Semantic fields must be non-empty single-line text without the hash
/// material delimiter, otherwise two different events could share material.
pub fn validate_field(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::validation(format!("{} must not be empty", name)));
    }
    if value.contains(FIELD_DELIMITER) {
        return Err(LedgerError::validation(format!(
            "{} must not contain '{}': {:?}",
            name, FIELD_DELIMITER, value
        )));
    }
    if value.contains('\n') || value.contains('\r') {
        return Err(LedgerError::validation(format!(
            "{} must be a single line",
            name
        )));
    }
    Ok(())
}

/// First 12 hex characters, as used in subjects and log lines.
pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(12) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}
