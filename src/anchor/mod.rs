//! Anchor Module
//!
//! Externalizes the ledger tip: a mutable current-state record plus an
//! append-only history trail that can be distributed independently.

pub mod files;
pub mod record;
pub mod verify;

pub use files::AnchorStore;
pub use record::{Anchor, AnchorHistoryEntry};
pub use verify::{check_anchor, verify_anchor};
