//! Anchor payload sent over transmission channels.

use serde::{Deserialize, Serialize};

use crate::anchor::AnchorStore;
use crate::error::Result;
use crate::ledger::event::{canonical_json, short_hash};

pub const DAILY_ANCHOR_TYPE: &str = "daily_anchor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub date: String,
    pub label: String,
    pub timestamp: String,
    pub latest_hash: String,
    pub anchor_file: String,
    pub anchor_history: String,
}

impl AnchorPayload {
    pub fn daily(
        date: &str,
        label: &str,
        timestamp: &str,
        latest_hash: &str,
        anchors: &AnchorStore,
    ) -> Self {
        Self {
            kind: DAILY_ANCHOR_TYPE.to_string(),
            date: date.to_string(),
            label: label.to_string(),
            timestamp: timestamp.to_string(),
            latest_hash: latest_hash.to_string(),
            anchor_file: anchors.anchor_file().display().to_string(),
            anchor_history: anchors.history_file().display().to_string(),
        }
    }

    /// `History Anchor <date> <first 12 hex chars>`
    pub fn subject(&self) -> String {
        format!(
            "History Anchor {} {}",
            self.date,
            short_hash(&self.latest_hash)
        )
    }

    /// Canonical JSON of the payload.
    pub fn body(&self) -> Result<String> {
        canonical_json(&serde_json::to_value(self)?)
    }
}
