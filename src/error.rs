use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Duplicate event: hash {event_hash} already exists in the ledger")]
    DuplicateEvent { event_hash: String },

    #[error(
        "Chain broken at event #{position} ({event_id}): prev_hash {actual_prev} does not match expected {expected_prev}"
    )]
    ChainIntegrity {
        position: u64,
        event_id: String,
        expected_prev: String,
        actual_prev: String,
    },

    #[error(
        "Tamper detected at event #{position} ({event_id}): stored hash {stored_hash} != recomputed {computed_hash} (hash covers {hashed_fields:?})"
    )]
    Tamper {
        position: u64,
        event_id: String,
        stored_hash: String,
        computed_hash: String,
        /// Every field the hash covers; the stored row no longer matches it.
        hashed_fields: &'static [&'static str],
    },

    #[error("Anchor parse error in {path}: {reason}")]
    AnchorParse { path: String, reason: String },

    #[error("Anchor mismatch: ledger tip {ledger_hash}, anchor {anchor_hash}")]
    AnchorMismatch {
        ledger_hash: String,
        anchor_hash: String,
    },

    #[error("Transmission failed for anchor {latest_hash}: {reason}")]
    Transmission { latest_hash: String, reason: String },

    #[error("Writer lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn anchor_parse(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AnchorParse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn transmission(latest_hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transmission {
            latest_hash: latest_hash.into(),
            reason: reason.into(),
        }
    }

    /// Chain faults forbid any further append or anchor until an operator
    /// has looked at the ledger.
    pub fn is_chain_fault(&self) -> bool {
        matches!(self, Self::ChainIntegrity { .. } | Self::Tamper { .. })
    }

    /// Errors the caller may resolve by retrying the same operation
    /// (possibly with a distinguishing field).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DuplicateEvent { .. } | Self::Transmission { .. } | Self::LockUnavailable(_)
        )
    }

    /// Chain position the error refers to, when there is one.
    pub fn position(&self) -> Option<u64> {
        match self {
            Self::ChainIntegrity { position, .. } | Self::Tamper { position, .. } => {
                Some(*position)
            }
            _ => None,
        }
    }
}
