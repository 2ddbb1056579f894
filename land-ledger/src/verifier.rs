//! Integrity verification of case chains.
//!
//! Verification is read-only: it recomputes every block hash and checks that
//! each block points at its predecessor. It never repairs anything.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::hashing::compute_block_hash;
use crate::store::{LedgerStore, StoreError};
use crate::types::{LedgerBlock, GENESIS_HASH};

/// Why a block failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainFailure {
    /// Stored fields no longer produce the stored hash
    HashMismatch { expected: String, actual: String },
    /// Block does not point at its predecessor (reordering or deletion)
    LinkMismatch {
        expected_previous: String,
        actual_previous: String,
    },
}

/// Outcome of verifying one case chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub case_id: String,
    /// Whether every block passed both checks
    pub valid: bool,
    /// Blocks examined, including the broken one
    pub blocks_checked: usize,
    /// First block that failed, marked `is_valid = Some(false)`
    pub first_broken_block: Option<LedgerBlock>,
    pub failure: Option<ChainFailure>,
}

impl VerificationReport {
    /// Id of the first broken block, if any.
    pub fn broken_block_id(&self) -> Option<&str> {
        self.first_broken_block.as_ref().map(|b| b.block_id.as_str())
    }
}

/// Recomputes hashes and links across a case chain.
pub struct IntegrityVerifier {
    store: Arc<dyn LedgerStore>,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Verify the chain of a case. An empty chain is valid.
    pub async fn verify(&self, case_id: &str) -> Result<VerificationReport, StoreError> {
        let blocks = self.store.blocks_for(case_id).await?;
        let report = verify_chain(case_id, &blocks);

        if !report.valid {
            tracing::warn!(
                case_id = %case_id,
                block_id = ?report.broken_block_id(),
                failure = ?report.failure,
                "Ledger chain failed verification"
            );
        }
        Ok(report)
    }
}

/// Verify blocks given in chain order.
pub fn verify_chain<'a>(
    case_id: &str,
    blocks: impl IntoIterator<Item = &'a LedgerBlock>,
) -> VerificationReport {
    let mut expected_previous = GENESIS_HASH.to_string();
    let mut checked = 0;

    for block in blocks {
        checked += 1;

        let recomputed = compute_block_hash(block);
        let failure = if recomputed != block.current_hash {
            Some(ChainFailure::HashMismatch {
                expected: block.current_hash.clone(),
                actual: recomputed,
            })
        } else if block.previous_hash != expected_previous {
            Some(ChainFailure::LinkMismatch {
                expected_previous,
                actual_previous: block.previous_hash.clone(),
            })
        } else {
            None
        };

        if let Some(failure) = failure {
            let mut broken = block.clone();
            broken.is_valid = Some(false);
            return VerificationReport {
                case_id: case_id.to_string(),
                valid: false,
                blocks_checked: checked,
                first_broken_block: Some(broken),
                failure: Some(failure),
            };
        }

        expected_previous = block.current_hash.clone();
    }

    VerificationReport {
        case_id: case_id.to_string(),
        valid: true,
        blocks_checked: checked,
        first_broken_block: None,
        failure: None,
    }
}

/// Copy blocks with `is_valid` filled in from a report.
///
/// Blocks before the break are valid, the broken block is invalid, and
/// blocks after it are left unjudged because verification stopped there.
pub fn annotate(blocks: &[LedgerBlock], report: &VerificationReport) -> Vec<LedgerBlock> {
    let mut verdict = Some(true);
    blocks
        .iter()
        .map(|block| {
            let mut block = block.clone();
            if report.broken_block_id() == Some(block.block_id.as_str()) {
                block.is_valid = Some(false);
                verdict = None;
            } else {
                block.is_valid = verdict;
            }
            block
        })
        .collect()
}
