//! Chain Verification
//!
//! Replays the ledger in chain order and confirms every link and every
//! hash. A full scan from `GENESIS` is the correctness baseline;
//! [`verify_incremental`] resumes from the last verified checkpoint.

use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, error, info};

use crate::error::{LedgerError, Result};
use crate::ledger::event::{format_timestamp, LedgerEvent, GENESIS_HASH, HASHED_FIELDS};
use crate::ledger::store::{fetch_by_seq, fetch_chain, EventStore, VerificationCheckpoint};

/// Verify the whole chain and return its tip (`GENESIS` when empty).
///
/// The scan runs inside one read transaction, so the returned tip belongs to
/// the same snapshot as every event that was checked even if a writer
/// commits meanwhile.
pub async fn verify(store: &EventStore) -> Result<String> {
    let mut tx = store.database().pool().begin().await?;
    let events = fetch_chain(&mut tx, None).await?;
    tx.rollback().await?;

    let tip = verify_events(&events, GENESIS_HASH, 1)?;
    info!("Chain verified: {} events, tip {}", events.len(), tip);
    Ok(tip)
}

/// Check `events` as a contiguous run of the chain whose first element must
/// link to `expected_prev` and sits at 1-based `first_position`.
pub fn verify_events(
    events: &[LedgerEvent],
    expected_prev: &str,
    first_position: u64,
) -> Result<String> {
    let mut prev = expected_prev.to_string();

    for (offset, event) in events.iter().enumerate() {
        let position = first_position + offset as u64;

        if event.prev_hash != prev {
            error!("Chain broken at event #{} ({})", position, event.event_id);
            return Err(LedgerError::ChainIntegrity {
                position,
                event_id: event.event_id.clone(),
                expected_prev: prev,
                actual_prev: event.prev_hash.clone(),
            });
        }

        let computed = event.compute_hash();
        if computed != event.event_hash {
            error!("Tamper detected at event #{} ({})", position, event.event_id);
            return Err(LedgerError::Tamper {
                position,
                event_id: event.event_id.clone(),
                stored_hash: event.event_hash.clone(),
                computed_hash: computed,
                hashed_fields: HASHED_FIELDS,
            });
        }

        prev = event.event_hash.clone();
    }

    Ok(prev)
}

/// Result of an incremental verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub tip_hash: String,
    /// Length of the chain up to the tip.
    pub chain_length: u64,
    /// Events actually re-hashed in this pass.
    pub events_checked: u64,
    /// Whether the pass resumed from a stored checkpoint.
    pub resumed: bool,
}

/// Chain state established by [`scan_chain`].
pub(crate) struct ChainScan {
    /// Last event in chain order, `None` for an empty ledger.
    pub tip: Option<LedgerEvent>,
    pub tip_hash: String,
    pub chain_length: u64,
    pub events_checked: u64,
    pub resumed: bool,
}

/// Verify the chain on `conn`, starting at `checkpoint` when given: the
/// checkpointed event must still exist and still carry its hash, then
/// every later event is checked. Without a checkpoint the whole chain is
/// scanned from `GENESIS`.
pub(crate) async fn scan_chain(
    conn: &mut SqliteConnection,
    checkpoint: Option<&VerificationCheckpoint>,
) -> Result<ChainScan> {
    let Some(cp) = checkpoint else {
        let mut events = fetch_chain(conn, None).await?;
        let tip_hash = verify_events(&events, GENESIS_HASH, 1)?;
        let chain_length = events.len() as u64;
        return Ok(ChainScan {
            tip: events.pop(),
            tip_hash,
            chain_length,
            events_checked: chain_length,
            resumed: false,
        });
    };

    let position = cp.position as u64;
    let anchor = fetch_by_seq(conn, cp.seq).await?.ok_or_else(|| {
        error!("Checkpointed event seq {} is gone", cp.seq);
        LedgerError::ChainIntegrity {
            position,
            event_id: format!("seq {} (missing)", cp.seq),
            expected_prev: cp.event_hash.clone(),
            actual_prev: "<deleted>".to_string(),
        }
    })?;

    let computed = anchor.compute_hash();
    if anchor.event_hash != cp.event_hash || computed != anchor.event_hash {
        error!("Checkpointed event #{} was rewritten", position);
        return Err(LedgerError::Tamper {
            position,
            event_id: anchor.event_id.clone(),
            stored_hash: cp.event_hash.clone(),
            computed_hash: computed,
            hashed_fields: HASHED_FIELDS,
        });
    }

    let mut events = fetch_chain(conn, Some((anchor.created_at.as_str(), anchor.seq))).await?;
    let tip_hash = verify_events(&events, &cp.event_hash, position + 1)?;
    let checked = events.len() as u64;
    Ok(ChainScan {
        tip: events.pop().or(Some(anchor)),
        tip_hash,
        chain_length: position + checked,
        events_checked: checked + 1,
        resumed: true,
    })
}

/// Verify only the events after the stored checkpoint, after confirming the
/// checkpointed event itself is unchanged. Falls back to a full scan when
/// there is no checkpoint. Records a new checkpoint on success.
///
/// Rewrites strictly before the checkpoint are only caught by [`verify`].
pub async fn verify_incremental(store: &EventStore) -> Result<VerifyOutcome> {
    let checkpoint = store.load_checkpoint().await?;

    let mut tx = store.database().pool().begin().await?;
    let scan = scan_chain(&mut tx, checkpoint.as_ref()).await?;
    tx.rollback().await?;

    let outcome = VerifyOutcome {
        tip_hash: scan.tip_hash,
        chain_length: scan.chain_length,
        events_checked: scan.events_checked,
        resumed: scan.resumed,
    };

    if let Some(tip) = &scan.tip {
        store
            .save_checkpoint(&VerificationCheckpoint {
                seq: tip.seq,
                event_hash: outcome.tip_hash.clone(),
                position: outcome.chain_length as i64,
                verified_at: format_timestamp(&Utc::now()),
            })
            .await?;
    }

    info!(
        "Incremental verification ok: checked {} of {} events, tip {}",
        outcome.events_checked, outcome.chain_length, outcome.tip_hash
    );
    Ok(outcome)
}

/// Verification result with detailed information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub entry_count: usize,
    /// Positions whose `prev_hash` does not match the preceding stored hash.
    pub broken_links: Vec<u64>,
    /// Positions whose recomputed hash differs from the stored one.
    pub tampered: Vec<u64>,
    /// Stored hash of the last event, or `GENESIS`.
    pub last_hash: String,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.broken_links.is_empty() && self.tampered.is_empty()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!("Ledger is valid ({} events)", self.entry_count)
        } else {
            format!(
                "Ledger is INVALID ({} events): {} broken link(s), {} tampered event(s)",
                self.entry_count,
                self.broken_links.len(),
                self.tampered.len()
            )
        }
    }

    /// Get detailed status
    pub fn detailed_status(&self) -> String {
        format!(
            "Events: {}\nBroken links at: {:?}\nTampered at: {:?}\nLast hash: {}",
            self.entry_count, self.broken_links, self.tampered, self.last_hash
        )
    }
}

/// Scan every event and collect all faults instead of stopping at the first.
pub fn inspect_events(events: &[LedgerEvent]) -> VerificationReport {
    let mut report = VerificationReport {
        entry_count: events.len(),
        last_hash: GENESIS_HASH.to_string(),
        ..Default::default()
    };

    let mut prev = GENESIS_HASH;
    for (i, event) in events.iter().enumerate() {
        let position = i as u64 + 1;
        if event.prev_hash != prev {
            report.broken_links.push(position);
        }
        if !event.verify_hash() {
            report.tampered.push(position);
        }
        prev = &event.event_hash;
    }

    if let Some(last) = events.last() {
        report.last_hash = last.event_hash.clone();
    }
    debug!("{}", report.detailed_status());
    report
}

pub async fn inspect(store: &EventStore) -> Result<VerificationReport> {
    let mut tx = store.database().pool().begin().await?;
    let events = fetch_chain(&mut tx, None).await?;
    tx.rollback().await?;
    Ok(inspect_events(&events))
}
