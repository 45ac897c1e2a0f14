//! Event Store
//!
//! Append-only SQLite persistence of chain-linked ledger events. The store
//! owns the linkage fields (`prev_hash`, `event_hash`, `seq`); callers
//! supply only the semantic fields.
//!
//! Every append happens inside a [`LedgerTransaction`], which holds the
//! writer lock and one database transaction. Domain records written through
//! [`LedgerTransaction::connection`] commit or roll back together with the
//! ledger events.

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteConnection};
use sqlx::Transaction;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{LedgerError, Result};
use crate::ledger::event::{
    canonical_json, compute_event_hash, format_timestamp, parse_timestamp, validate_field,
    LedgerEvent, GENESIS_HASH,
};
use crate::ledger::lock::{WriterGuard, WriterLock};
use crate::ledger::verify::scan_chain;

const EVENT_COLUMNS: &str = "seq, event_id, created_at, event_type, entity_type, entity_id, \
                             payload_json, prev_hash, event_hash";

/// Last tip confirmed by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VerificationCheckpoint {
    pub seq: i64,
    pub event_hash: String,
    pub position: i64,
    pub verified_at: String,
}

#[derive(Clone)]
pub struct EventStore {
    database: Database,
    lock: Arc<dyn WriterLock>,
}

impl EventStore {
    pub fn new(database: Database, lock: Arc<dyn WriterLock>) -> Self {
        Self { database, lock }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Acquire exclusive write ownership without opening a transaction.
    pub async fn lock_writer(&self) -> Result<WriterGuard> {
        self.lock.acquire().await
    }

    /// Open a write scope: writer lock first, then one database transaction.
    pub async fn begin(&self) -> Result<LedgerTransaction> {
        let guard = self.lock.acquire().await?;
        let tx = self.database.pool().begin().await?;
        Ok(LedgerTransaction {
            tx,
            appended: Vec::new(),
            _guard: guard,
        })
    }

    /// Append a single event in its own transaction.
    pub async fn append(
        &self,
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
    ) -> Result<String> {
        let mut tx = self.begin().await?;
        let hash = tx.append(event_type, entity_type, entity_id, payload).await?;
        tx.commit().await?;
        Ok(hash)
    }

    /// Append a single event with an explicit `created_at`.
    pub async fn append_at(
        &self,
        created_at: &str,
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
    ) -> Result<String> {
        let mut tx = self.begin().await?;
        let hash = tx
            .append_at(created_at, event_type, entity_type, entity_id, payload)
            .await?;
        tx.commit().await?;
        Ok(hash)
    }

    /// Current tip hash, or `GENESIS` for an empty ledger.
    pub async fn tip(&self) -> Result<String> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT event_hash FROM ledger_events ORDER BY created_at DESC, seq DESC LIMIT 1",
        )
        .fetch_optional(self.database.pool())
        .await?;
        Ok(row.map(|(hash,)| hash).unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_events")
            .fetch_one(self.database.pool())
            .await?;
        Ok(count)
    }

    /// Every event in chain order.
    pub async fn all_events(&self) -> Result<Vec<LedgerEvent>> {
        let mut conn = self.database.pool().acquire().await?;
        fetch_chain(&mut conn, None).await
    }

    /// Newest events first. Read-only view for analytics consumers.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<LedgerEvent>> {
        if limit == 0 {
            return Err(LedgerError::validation("limit must be at least 1"));
        }
        let events = sqlx::query_as::<_, LedgerEvent>(&format!(
            "SELECT {} FROM ledger_events ORDER BY created_at DESC, seq DESC LIMIT ?",
            EVENT_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(self.database.pool())
        .await?;
        Ok(events)
    }

    pub async fn event_by_seq(&self, seq: i64) -> Result<Option<LedgerEvent>> {
        let mut conn = self.database.pool().acquire().await?;
        fetch_by_seq(&mut conn, seq).await
    }

    pub async fn load_checkpoint(&self) -> Result<Option<VerificationCheckpoint>> {
        let mut conn = self.database.pool().acquire().await?;
        fetch_checkpoint(&mut conn).await
    }

    pub async fn save_checkpoint(&self, checkpoint: &VerificationCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_checkpoints (id, seq, event_hash, position, verified_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                seq = excluded.seq,
                event_hash = excluded.event_hash,
                position = excluded.position,
                verified_at = excluded.verified_at
            "#,
        )
        .bind(checkpoint.seq)
        .bind(&checkpoint.event_hash)
        .bind(checkpoint.position)
        .bind(&checkpoint.verified_at)
        .execute(self.database.pool())
        .await?;
        debug!(
            "Saved verification checkpoint at #{} ({})",
            checkpoint.position, checkpoint.event_hash
        );
        Ok(())
    }

    pub async fn clear_checkpoint(&self) -> Result<()> {
        sqlx::query("DELETE FROM verification_checkpoints")
            .execute(self.database.pool())
            .await?;
        Ok(())
    }
}

/// Events in chain order, optionally only those strictly after the
/// `(created_at, seq)` position of a known event.
pub(crate) async fn fetch_chain(
    conn: &mut SqliteConnection,
    after: Option<(&str, i64)>,
) -> Result<Vec<LedgerEvent>> {
    let events = match after {
        None => {
            sqlx::query_as::<_, LedgerEvent>(&format!(
                "SELECT {} FROM ledger_events ORDER BY created_at ASC, seq ASC",
                EVENT_COLUMNS
            ))
            .fetch_all(conn)
            .await?
        }
        Some((created_at, seq)) => {
            sqlx::query_as::<_, LedgerEvent>(&format!(
                "SELECT {} FROM ledger_events \
                 WHERE created_at > ? OR (created_at = ? AND seq > ?) \
                 ORDER BY created_at ASC, seq ASC",
                EVENT_COLUMNS
            ))
            .bind(created_at)
            .bind(created_at)
            .bind(seq)
            .fetch_all(conn)
            .await?
        }
    };
    Ok(events)
}

pub(crate) async fn fetch_by_seq(
    conn: &mut SqliteConnection,
    seq: i64,
) -> Result<Option<LedgerEvent>> {
    let event = sqlx::query_as::<_, LedgerEvent>(&format!(
        "SELECT {} FROM ledger_events WHERE seq = ?",
        EVENT_COLUMNS
    ))
    .bind(seq)
    .fetch_optional(conn)
    .await?;
    Ok(event)
}

pub(crate) async fn fetch_checkpoint(
    conn: &mut SqliteConnection,
) -> Result<Option<VerificationCheckpoint>> {
    let checkpoint = sqlx::query_as::<_, VerificationCheckpoint>(
        "SELECT seq, event_hash, position, verified_at FROM verification_checkpoints WHERE id = 1",
    )
    .fetch_optional(conn)
    .await?;
    Ok(checkpoint)
}

/// One atomic write scope over the ledger and any domain tables.
/// Dropping it without [`commit`](Self::commit) rolls everything back.
pub struct LedgerTransaction {
    // Field order matters: the transaction rolls back before the lock is released.
    tx: Transaction<'static, Sqlite>,
    appended: Vec<LedgerEvent>,
    _guard: WriterGuard,
}

impl LedgerTransaction {
    /// Connection for the accompanying domain write, inside this transaction.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    /// Append an event stamped with the current time.
    pub async fn append(
        &mut self,
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
    ) -> Result<String> {
        self.append_inner(None, event_type, entity_type, entity_id, payload)
            .await
    }

    /// Append an event with an explicit `YYYY-MM-DDTHH:MM:SSZ` timestamp,
    /// which may not sort before the current tip.
    pub async fn append_at(
        &mut self,
        created_at: &str,
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
    ) -> Result<String> {
        self.append_inner(Some(created_at), event_type, entity_type, entity_id, payload)
            .await
    }

    /// Events appended so far in this scope.
    pub fn appended(&self) -> &[LedgerEvent] {
        &self.appended
    }

    pub async fn commit(self) -> Result<Vec<LedgerEvent>> {
        let LedgerTransaction { tx, appended, _guard } = self;
        tx.commit().await?;
        if let Some(last) = appended.last() {
            info!(
                "Committed {} ledger event(s), tip {}",
                appended.len(),
                last.event_hash
            );
        }
        Ok(appended)
    }

    pub async fn rollback(self) -> Result<()> {
        let LedgerTransaction { tx, appended, _guard } = self;
        tx.rollback().await?;
        if !appended.is_empty() {
            warn!("Rolled back {} ledger event(s)", appended.len());
        }
        Ok(())
    }

    async fn append_inner(
        &mut self,
        created_at: Option<&str>,
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
    ) -> Result<String> {
        validate_field("event_type", event_type)?;
        validate_field("entity_type", entity_type)?;
        validate_field("entity_id", entity_id)?;
        let payload_json = canonical_json(payload)?;

        // Never extend a chain that does not verify from the last checkpoint.
        let checkpoint = fetch_checkpoint(&mut *self.tx).await?;
        let scan = scan_chain(&mut *self.tx, checkpoint.as_ref())
            .await
            .map_err(|e| {
                error!("Refusing append: {}", e);
                e
            })?;
        let prev_hash = scan.tip_hash.clone();
        let tip_created_at = scan.tip.as_ref().map(|event| event.created_at.clone());
        let tip_seq = scan.tip.as_ref().map(|event| event.seq).unwrap_or(0);

        let created_at = match created_at {
            Some(explicit) => {
                parse_timestamp(explicit)?;
                if let Some(tip_ts) = &tip_created_at {
                    if explicit < tip_ts.as_str() {
                        return Err(LedgerError::validation(format!(
                            "created_at {} sorts before the current tip ({})",
                            explicit, tip_ts
                        )));
                    }
                }
                explicit.to_string()
            }
            None => {
                let now = format_timestamp(&Utc::now());
                match tip_created_at {
                    Some(tip_ts) if now < tip_ts => {
                        warn!("Clock is behind the ledger tip ({} < {}); using tip time", now, tip_ts);
                        tip_ts
                    }
                    _ => now,
                }
            }
        };

        let event_hash = compute_event_hash(
            &prev_hash,
            &created_at,
            event_type,
            entity_type,
            entity_id,
            &payload_json,
        );

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT seq FROM ledger_events WHERE event_hash = ?")
                .bind(&event_hash)
                .fetch_optional(&mut *self.tx)
                .await?;
        if existing.is_some() {
            return Err(LedgerError::DuplicateEvent { event_hash });
        }

        let event_id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_events
                (event_id, created_at, event_type, entity_type, entity_id, payload_json, prev_hash, event_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event_id)
        .bind(&created_at)
        .bind(event_type)
        .bind(entity_type)
        .bind(entity_id)
        .bind(&payload_json)
        .bind(&prev_hash)
        .bind(&event_hash)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                LedgerError::DuplicateEvent {
                    event_hash: event_hash.clone(),
                }
            }
            other => LedgerError::DatabaseError(other),
        })?;

        let event = LedgerEvent {
            seq: result.last_insert_rowid(),
            event_id,
            created_at,
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            payload_json,
            prev_hash,
            event_hash: event_hash.clone(),
        };
        debug!(
            "Appended ledger event #{} after seq {}: {}",
            scan.chain_length + 1,
            tip_seq,
            event.summary()
        );
        self.appended.push(event);
        Ok(event_hash)
    }
}
