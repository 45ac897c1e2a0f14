//! Anchor Verification
//!
//! Cross-checks the current-state anchor against the ledger.

use tracing::{error, info};

use crate::anchor::files::AnchorStore;
use crate::anchor::record::Anchor;
use crate::error::{LedgerError, Result};
use crate::ledger::{self, EventStore};

/// Fail with `AnchorMismatch` unless the anchor points at `ledger_tip`.
pub fn check_anchor(anchor: &Anchor, ledger_tip: &str) -> Result<()> {
    if anchor.latest_hash != ledger_tip {
        error!(
            "ANCHOR MISMATCH: ledger tip {}, anchor {}",
            ledger_tip, anchor.latest_hash
        );
        return Err(LedgerError::AnchorMismatch {
            ledger_hash: ledger_tip.to_string(),
            anchor_hash: anchor.latest_hash.clone(),
        });
    }
    Ok(())
}

/// Verify the full chain, then confirm the anchor record names its tip.
pub async fn verify_anchor(store: &EventStore, anchors: &AnchorStore) -> Result<String> {
    let tip = ledger::verify(store).await?;
    let anchor = anchors.read_anchor()?;
    check_anchor(&anchor, &tip)?;
    info!("Anchor {} matches ledger tip", anchors.anchor_file().display());
    Ok(tip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::GENESIS_HASH;

    #[test]
    fn test_check_anchor() {
        let anchor = Anchor::new(GENESIS_HASH, "2026-02-01T00:00:00Z", "n");
        assert!(check_anchor(&anchor, GENESIS_HASH).is_ok());

        let err = check_anchor(&anchor, "ff").unwrap_err();
        match err {
            LedgerError::AnchorMismatch {
                ledger_hash,
                anchor_hash,
            } => {
                assert_eq!(ledger_hash, "ff");
                assert_eq!(anchor_hash, GENESIS_HASH);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
