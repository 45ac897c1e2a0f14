//! Decision Ledger
//!
//! Tamper-evident, append-only event log. Each event commits to its
//! predecessor through a SHA-256 hash chain rooted at `GENESIS`.

pub mod event;
pub mod lock;
pub mod store;
pub mod verify;

pub use event::{canonical_json, compute_event_hash, LedgerEvent, GENESIS_HASH};
pub use lock::{InProcessLock, LockFile, WriterGuard, WriterLock};
pub use store::{EventStore, LedgerTransaction, VerificationCheckpoint};
pub use verify::{inspect, verify, verify_events, verify_incremental, VerificationReport, VerifyOutcome};
