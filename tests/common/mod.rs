#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use decision_ledger::anchor::AnchorStore;
use decision_ledger::database::Database;
use decision_ledger::ledger::{EventStore, InProcessLock};
use decision_ledger::transmit::Transmitter;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TS: [&str; 5] = [
    "2026-01-05T09:00:00Z",
    "2026-01-05T09:10:00Z",
    "2026-01-05T09:20:00Z",
    "2026-01-05T09:30:00Z",
    "2026-01-05T09:40:00Z",
];

/// Setup an in-memory ledger for testing
pub async fn setup_store() -> EventStore {
    let database = Database::new_in_memory()
        .await
        .expect("Failed to create test database");
    EventStore::new(database, Arc::new(InProcessLock::new()))
}

pub fn anchor_store(dir: &Path) -> AnchorStore {
    AnchorStore::new(dir.join("ANCHOR.txt"), dir.join("ANCHOR_HISTORY.log"))
}

/// Append `count` decision events at the fixed `TS` timestamps.
pub async fn seed_decisions(store: &EventStore, count: usize) -> Vec<String> {
    let mut hashes = Vec::new();
    for (i, ts) in TS.iter().take(count).enumerate() {
        let hash = store
            .append_at(
                ts,
                "decision.create",
                "decision",
                &format!("D-{}", i + 1),
                &json!({"title": format!("Decision {}", i + 1), "votes": i}),
            )
            .await
            .expect("append failed");
        hashes.push(hash);
    }
    hashes
}

/// Overwrite one column of a stored event behind the ledger's back.
pub async fn tamper(store: &EventStore, seq: i64, column: &str, value: &str) {
    sqlx::query(&format!("UPDATE ledger_events SET {} = ? WHERE seq = ?", column))
        .bind(value)
        .bind(seq)
        .execute(store.database().pool())
        .await
        .expect("tamper update failed");
}

/// Records every message it is asked to send.
#[derive(Default)]
pub struct RecordingTransmitter {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransmitter {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transmitter for RecordingTransmitter {
    fn channel(&self) -> &str {
        "recording"
    }

    async fn transmit(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct FailingTransmitter;

#[async_trait]
impl Transmitter for FailingTransmitter {
    fn channel(&self) -> &str {
        "failing"
    }

    async fn transmit(&self, _subject: &str, _body: &str) -> anyhow::Result<()> {
        Err(anyhow!("relay refused connection"))
    }
}

/// Never finishes within any reasonable timeout.
pub struct StalledTransmitter;

#[async_trait]
impl Transmitter for StalledTransmitter {
    fn channel(&self) -> &str {
        "stalled"
    }

    async fn transmit(&self, _subject: &str, _body: &str) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}
