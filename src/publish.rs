//! Publish Orchestrator
//!
//! Verifies the chain, snapshots its tip into the anchor files and sends
//! the snapshot to an external channel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::anchor::{check_anchor, Anchor, AnchorStore};
use crate::config::DEFAULT_TRANSMIT_TIMEOUT_SECS;
use crate::error::{LedgerError, Result};
use crate::ledger::event::format_timestamp;
use crate::ledger::{self, EventStore};
use crate::transmit::{AnchorPayload, Transmitter};

pub const NOTE_PREFIX: &str = "DAILY_ANCHOR";

/// Outcome of a publish run that got as far as writing the anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub tip_hash: String,
    pub timestamp: String,
    pub note: String,
    pub subject: String,
    pub channel: String,
}

pub struct Publisher {
    store: EventStore,
    anchors: AnchorStore,
    transmitter: Arc<dyn Transmitter>,
    timeout: Duration,
}

impl Publisher {
    pub fn new(store: EventStore, anchors: AnchorStore, transmitter: Arc<dyn Transmitter>) -> Self {
        Self {
            store,
            anchors,
            transmitter,
            timeout: Duration::from_secs(DEFAULT_TRANSMIT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn anchors(&self) -> &AnchorStore {
        &self.anchors
    }

    /// Publish the current tip under `label`.
    pub async fn publish(&self, label: &str) -> Result<PublishReport> {
        self.publish_at(label, Utc::now()).await
    }

    /// Publish with an explicit clock reading.
    ///
    /// A `Transmission` error means the anchor files were already updated;
    /// only [`Publisher::retransmit`] needs to run again.
    pub async fn publish_at(&self, label: &str, now: DateTime<Utc>) -> Result<PublishReport> {
        let timestamp = format_timestamp(&now);
        let date = now.format("%Y-%m-%d").to_string();
        let label = label.trim();
        let note = daily_note(&date, label);

        let tip_hash = {
            let _guard = self.store.lock_writer().await?;

            let tip_hash = ledger::verify(&self.store).await.map_err(|e| {
                error!("Refusing to publish: {}", e);
                e
            })?;

            // History first: an anchor never names a tip missing from history.
            self.anchors.append_history(&timestamp, &tip_hash, &note)?;
            self.anchors.write_anchor(&tip_hash, &note, &timestamp)?;

            let written = self.anchors.read_anchor()?;
            check_anchor(&written, &tip_hash)?;
            check_anchor(&written, &self.store.tip().await?)?;

            info!("Anchored tip {} ({})", tip_hash, note);
            tip_hash
        };

        let payload = AnchorPayload::daily(&date, label, &timestamp, &tip_hash, &self.anchors);
        let subject = self.send(&payload).await?;

        Ok(PublishReport {
            tip_hash,
            timestamp,
            note,
            subject,
            channel: self.transmitter.channel().to_string(),
        })
    }

    /// Send the current anchor record again without touching the chain or
    /// the anchor files.
    pub async fn retransmit(&self) -> Result<PublishReport> {
        let anchor = self.anchors.read_anchor()?;
        let timestamp = anchor.timestamp.clone().unwrap_or_default();
        let note = anchor.note.clone().unwrap_or_default();
        let (date, label) = note_parts(&anchor);

        let payload =
            AnchorPayload::daily(&date, &label, &timestamp, &anchor.latest_hash, &self.anchors);
        let subject = self.send(&payload).await?;

        Ok(PublishReport {
            tip_hash: anchor.latest_hash,
            timestamp,
            note,
            subject,
            channel: self.transmitter.channel().to_string(),
        })
    }

    async fn send(&self, payload: &AnchorPayload) -> Result<String> {
        let subject = payload.subject();
        let body = payload.body()?;
        let channel = self.transmitter.channel();

        let result = tokio::time::timeout(self.timeout, self.transmitter.transmit(&subject, &body))
            .await;
        match result {
            Ok(Ok(())) => {
                info!("Transmitted {} via {}", subject, channel);
                Ok(subject)
            }
            Ok(Err(e)) => {
                warn!("Transmission via {} failed: {:#}", channel, e);
                Err(LedgerError::transmission(&payload.latest_hash, format!("{:#}", e)))
            }
            Err(_) => {
                warn!("Transmission via {} timed out after {:?}", channel, self.timeout);
                Err(LedgerError::transmission(
                    &payload.latest_hash,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        }
    }
}

/// `DAILY_ANCHOR <date> <label>`, trimmed.
pub fn daily_note(date: &str, label: &str) -> String {
    format!("{} {} {}", NOTE_PREFIX, date, label.trim())
        .trim()
        .to_string()
}

/// Recover date and label from an anchor written by [`Publisher::publish_at`].
/// Foreign notes fall back to the timestamp's date and the whole note.
fn note_parts(anchor: &Anchor) -> (String, String) {
    let note = anchor.note.as_deref().unwrap_or("");
    let mut parts = note.splitn(3, ' ');
    if let (Some(NOTE_PREFIX), Some(date)) = (parts.next(), parts.next()) {
        return (date.to_string(), parts.next().unwrap_or("").to_string());
    }
    let date = anchor
        .timestamp
        .as_deref()
        .and_then(|ts| ts.get(..10))
        .unwrap_or("")
        .to_string();
    (date, note.to_string())
}
