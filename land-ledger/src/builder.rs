//! Block minting.
//!
//! The builder links a draft to the latest block of the same case and seals
//! it with a hash. It never persists; the caller appends the block inside
//! its own atomic unit.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::hashing::compute_block_hash;
use crate::store::{LedgerStore, StoreError};
use crate::types::{BlockDraft, LedgerBlock, GENESIS_HASH, HASH_VERSION};

/// Mints the next block of a case chain.
pub struct BlockBuilder {
    store: Arc<dyn LedgerStore>,
}

impl BlockBuilder {
    /// Create a builder reading chain tips from `store`.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Build the next block for the draft's case.
    pub async fn build(&self, draft: BlockDraft) -> Result<LedgerBlock, StoreError> {
        self.build_at(draft, Utc::now()).await
    }

    /// Build with a caller-supplied clock reading, so derived values such as
    /// deadlines can share the block's time.
    pub async fn build_at(
        &self,
        draft: BlockDraft,
        now: DateTime<Utc>,
    ) -> Result<LedgerBlock, StoreError> {
        let latest = self.store.latest_block_for(&draft.case_id).await?;
        Ok(Self::seal(draft, latest.as_ref(), now, generate_nonce()))
    }

    /// `now`, held back to the previous block's time if the clock stepped
    /// back.
    pub fn stamp(previous: Option<&LedgerBlock>, now: DateTime<Utc>) -> DateTime<Utc> {
        match previous {
            Some(prev) => now.max(prev.occurred_at),
            None => now,
        }
    }

    /// Pure part of [`BlockBuilder::build`]: link, stamp and hash.
    ///
    /// `occurred_at` never goes backwards within a case, so chain order and
    /// time order agree even if the wall clock steps back.
    pub fn seal(
        draft: BlockDraft,
        previous: Option<&LedgerBlock>,
        now: DateTime<Utc>,
        nonce: String,
    ) -> LedgerBlock {
        let (previous_hash, height, occurred_at) = match previous {
            Some(prev) => (
                prev.current_hash.clone(),
                prev.height + 1,
                Self::stamp(previous, now),
            ),
            None => (GENESIS_HASH.to_string(), 0, now),
        };

        let block_id = format!(
            "{}:{}:{}:{}",
            draft.case_id,
            draft.event_type,
            occurred_at.timestamp_micros(),
            &nonce[..nonce.len().min(8)]
        );

        let mut block = LedgerBlock {
            block_id,
            case_id: draft.case_id,
            height,
            event_type: draft.event_type,
            officer_id: draft.officer_id,
            project_id: draft.project_id,
            occurred_at,
            metadata: draft.metadata,
            remarks: draft.remarks,
            previous_hash,
            nonce,
            hash_version: HASH_VERSION.to_string(),
            current_hash: String::new(),
            is_valid: None,
        };
        block.current_hash = compute_block_hash(&block);
        block
    }
}

/// 128 random bits, lowercase hex.
pub fn generate_nonce() -> String {
    format!("{:032x}", rand::random::<u128>())
}
