//! Anchor Records
//!
//! Text formats of the current-state anchor record and of the append-only
//! anchor history trail.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::ledger::GENESIS_HASH;

const HISTORY_SEPARATOR: &str = " | ";

/// Current-state anchor: a mutable pointer to the chain tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub latest_hash: String,
    /// Absent when the record is in the legacy bare-hash format.
    pub timestamp: Option<String>,
    pub note: Option<String>,
}

impl Anchor {
    pub fn new(latest_hash: &str, timestamp: &str, note: &str) -> Self {
        Self {
            latest_hash: latest_hash.to_string(),
            timestamp: Some(timestamp.to_string()),
            note: Some(single_line(note)),
        }
    }

    /// Three `key=value` lines.
    pub fn to_record(&self) -> String {
        format!(
            "latest_hash={}\ntimestamp={}\nnote={}\n",
            self.latest_hash,
            self.timestamp.as_deref().unwrap_or_default(),
            self.note.as_deref().unwrap_or_default()
        )
    }

    /// Parse a current-state record. A record without any `key=value` line
    /// is read as the legacy format whose first line is the bare hash.
    pub fn parse(content: &str, source: &str) -> Result<Self> {
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if lines.is_empty() {
            return Err(LedgerError::anchor_parse(source, "anchor record is empty"));
        }

        if !lines.iter().any(|l| l.contains('=')) {
            return Ok(Self {
                latest_hash: lines[0].to_string(),
                timestamp: None,
                note: None,
            });
        }

        let mut latest_hash = None;
        let mut timestamp = None;
        let mut note = None;
        for line in lines {
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().to_string();
                match key.trim() {
                    "latest_hash" => latest_hash = Some(value),
                    "timestamp" => timestamp = Some(value),
                    "note" => note = Some(value),
                    _ => {}
                }
            }
        }

        match latest_hash {
            Some(hash) if !hash.is_empty() => Ok(Self {
                latest_hash: hash,
                timestamp,
                note,
            }),
            _ => Err(LedgerError::anchor_parse(source, "missing latest_hash")),
        }
    }
}

/// One line of the append-only anchor history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorHistoryEntry {
    pub timestamp: String,
    pub hash: String,
    pub note: String,
}

impl AnchorHistoryEntry {
    pub fn new(timestamp: &str, hash: &str, note: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            hash: hash.to_string(),
            note: single_line(note),
        }
    }

    /// `<timestamp> | <hash> | <note>`
    pub fn to_line(&self) -> String {
        [self.timestamp.as_str(), self.hash.as_str(), self.note.as_str()].join(HISTORY_SEPARATOR)
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, HISTORY_SEPARATOR);
        let timestamp = parts.next()?.trim();
        let hash = parts.next()?.trim();
        let note = parts.next()?;
        if timestamp.is_empty() || hash.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: timestamp.to_string(),
            hash: hash.to_string(),
            note: note.trim_end().to_string(),
        })
    }
}

/// A tip hash as it may appear in anchors: `GENESIS` or 64 lowercase hex.
pub fn is_valid_tip_hash(hash: &str) -> bool {
    hash == GENESIS_HASH
        || (hash.len() == 64
            && hash
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)))
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "3f79bb7b435b05321651daefd374cdc681dc06faa65e374e38337b88ca046dea";

    #[test]
    fn test_record_round_trip() {
        let anchor = Anchor::new(HASH, "2026-02-01T00:00:00Z", "DAILY_ANCHOR 2026-02-01 EOD");
        let parsed = Anchor::parse(&anchor.to_record(), "ANCHOR.txt").unwrap();
        assert_eq!(parsed, anchor);
    }

    #[test]
    fn test_legacy_bare_hash() {
        let parsed = Anchor::parse(&format!("{}\n", HASH), "ANCHOR.txt").unwrap();
        assert_eq!(parsed.latest_hash, HASH);
        assert_eq!(parsed.timestamp, None);
        assert_eq!(parsed.note, None);
    }

    #[test]
    fn test_missing_latest_hash() {
        let err = Anchor::parse("timestamp=2026-02-01T00:00:00Z\nnote=x\n", "ANCHOR.txt")
            .unwrap_err();
        assert!(matches!(err, LedgerError::AnchorParse { .. }));

        let err = Anchor::parse("latest_hash=\n", "ANCHOR.txt").unwrap_err();
        assert!(matches!(err, LedgerError::AnchorParse { .. }));

        let err = Anchor::parse("  \n", "ANCHOR.txt").unwrap_err();
        assert!(matches!(err, LedgerError::AnchorParse { .. }));
    }

    #[test]
    fn test_note_keeps_equals_sign() {
        let parsed = Anchor::parse(
            &format!("latest_hash={}\ntimestamp=t\nnote=a=b\n", HASH),
            "ANCHOR.txt",
        )
        .unwrap();
        assert_eq!(parsed.note.as_deref(), Some("a=b"));
    }

    #[test]
    fn test_history_line() {
        let entry = AnchorHistoryEntry::new("2026-02-01T00:00:00Z", HASH, "line one\nline two");
        let line = entry.to_line();
        assert_eq!(
            line,
            format!("2026-02-01T00:00:00Z | {} | line one line two", HASH)
        );
        assert_eq!(AnchorHistoryEntry::parse_line(&line), Some(entry));

        let with_pipe = format!("t | {} | a | b", HASH);
        assert_eq!(AnchorHistoryEntry::parse_line(&with_pipe).unwrap().note, "a | b");
        assert_eq!(AnchorHistoryEntry::parse_line("garbage"), None);
    }

    #[test]
    fn test_tip_hash_validation() {
        assert!(is_valid_tip_hash(HASH));
        assert!(is_valid_tip_hash(GENESIS_HASH));
        assert!(!is_valid_tip_hash(&HASH.to_uppercase()));
        assert!(!is_valid_tip_hash("abc"));
    }
}
