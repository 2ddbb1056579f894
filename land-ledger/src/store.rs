//! Ledger block persistence.
//!
//! The [`LedgerStore`] trait is the seam between the ledger and whatever
//! backs it. Stores only enforce chain shape on append (the new block must
//! extend the current tip of its case); ordering between concurrent writers
//! of one case is the caller's job.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{LedgerBlock, GENESIS_HASH};

/// Error types for ledger store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backing storage could not be reached
    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    /// Another block extended the case chain first
    #[error("Concurrent write conflict on case {case_id}")]
    ConcurrentWriteConflict { case_id: String },

    /// `(case_id, block_id)` must be unique
    #[error("Block {block_id} already exists for case {case_id}")]
    DuplicateBlock { case_id: String, block_id: String },
}

/// A finite, restartable view over one case chain.
///
/// Iterating twice yields the same blocks in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockSequence {
    blocks: Arc<[LedgerBlock]>,
}

impl BlockSequence {
    /// Wrap blocks that are already in chain order.
    pub fn new(blocks: Vec<LedgerBlock>) -> Self {
        Self {
            blocks: blocks.into(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LedgerBlock> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn last(&self) -> Option<&LedgerBlock> {
        self.blocks.last()
    }

    pub fn as_slice(&self) -> &[LedgerBlock] {
        &self.blocks
    }

    pub fn to_vec(&self) -> Vec<LedgerBlock> {
        self.blocks.to_vec()
    }
}

impl<'a> IntoIterator for &'a BlockSequence {
    type Item = &'a LedgerBlock;
    type IntoIter = std::slice::Iter<'a, LedgerBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

/// Trait for ordered, append-only block storage.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a block to its case chain.
    ///
    /// Fails with [`StoreError::ConcurrentWriteConflict`] if the block does
    /// not extend the current tip of the case.
    async fn append(&self, block: LedgerBlock) -> Result<LedgerBlock, StoreError>;

    /// Most recent block of a case, if any.
    async fn latest_block_for(&self, case_id: &str) -> Result<Option<LedgerBlock>, StoreError>;

    /// All blocks of a case ordered by `occurred_at`, ties broken by `height`.
    async fn blocks_for(&self, case_id: &str) -> Result<BlockSequence, StoreError>;

    /// All blocks tagged with a project, ordered by `occurred_at`.
    async fn blocks_for_project(&self, project_id: &str) -> Result<Vec<LedgerBlock>, StoreError>;

    /// Every case that has at least one block.
    async fn case_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory ledger store.
///
/// Chains are kept per case in append order. A project index maps project
/// ids to the cases that carry blocks for them.
pub struct InMemoryLedgerStore {
    /// Case chains keyed by case id
    chains: Arc<RwLock<HashMap<String, Vec<LedgerBlock>>>>,
    /// Index by project for history queries
    by_project: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
}

impl InMemoryLedgerStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            chains: Arc::new(RwLock::new(HashMap::new())),
            by_project: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Total number of stored blocks across all cases.
    pub async fn count(&self) -> usize {
        let chains = self.chains.read().await;
        chains.values().map(Vec::len).sum()
    }

    /// Edit a stored block in place, bypassing every ledger rule.
    ///
    /// This is raw storage access, the in-memory equivalent of someone
    /// running an `UPDATE` against the blocks table. Audits and tests use it
    /// to simulate tampering. Returns `false` if no block has that height.
    pub async fn tamper<F>(&self, case_id: &str, height: u64, edit: F) -> bool
    where
        F: FnOnce(&mut LedgerBlock),
    {
        let mut chains = self.chains.write().await;
        let block = chains
            .get_mut(case_id)
            .and_then(|chain| chain.iter_mut().find(|b| b.height == height));

        match block {
            Some(block) => {
                tracing::warn!(case_id = %case_id, height, "Raw edit of stored ledger block");
                edit(block);
                true
            }
            None => false,
        }
    }

    /// Delete a stored block, bypassing every ledger rule.
    pub async fn tamper_remove(&self, case_id: &str, height: u64) -> Option<LedgerBlock> {
        let mut chains = self.chains.write().await;
        let chain = chains.get_mut(case_id)?;
        let pos = chain.iter().position(|b| b.height == height)?;
        tracing::warn!(case_id = %case_id, height, "Raw delete of stored ledger block");
        Some(chain.remove(pos))
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, mut block: LedgerBlock) -> Result<LedgerBlock, StoreError> {
        // The verdict belongs to the verifier
        block.is_valid = None;

        {
            let mut chains = self.chains.write().await;
            let chain = chains.entry(block.case_id.clone()).or_default();

            let (tip_hash, next_height) = match chain.last() {
                Some(tip) => (tip.current_hash.as_str(), tip.height + 1),
                None => (GENESIS_HASH, 0),
            };

            if block.previous_hash != tip_hash || block.height != next_height {
                tracing::debug!(
                    case_id = %block.case_id,
                    expected_height = next_height,
                    got_height = block.height,
                    "Rejected block that does not extend the case tip"
                );
                return Err(StoreError::ConcurrentWriteConflict {
                    case_id: block.case_id,
                });
            }

            if chain.iter().any(|b| b.block_id == block.block_id) {
                return Err(StoreError::DuplicateBlock {
                    case_id: block.case_id,
                    block_id: block.block_id,
                });
            }

            chain.push(block.clone());
        }

        {
            let mut by_project = self.by_project.write().await;
            by_project
                .entry(block.project_id.clone())
                .or_default()
                .insert(block.case_id.clone());
        }

        tracing::debug!(
            case_id = %block.case_id,
            block_id = %block.block_id,
            height = block.height,
            "Appended ledger block"
        );
        Ok(block)
    }

    async fn latest_block_for(&self, case_id: &str) -> Result<Option<LedgerBlock>, StoreError> {
        let chains = self.chains.read().await;
        Ok(chains.get(case_id).and_then(|chain| chain.last().cloned()))
    }

    async fn blocks_for(&self, case_id: &str) -> Result<BlockSequence, StoreError> {
        let chains = self.chains.read().await;
        let mut blocks = chains.get(case_id).cloned().unwrap_or_default();
        blocks.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then(a.height.cmp(&b.height))
        });
        Ok(BlockSequence::new(blocks))
    }

    async fn blocks_for_project(&self, project_id: &str) -> Result<Vec<LedgerBlock>, StoreError> {
        let by_project = self.by_project.read().await;
        let chains = self.chains.read().await;

        let mut blocks: Vec<LedgerBlock> = by_project
            .get(project_id)
            .map(|cases| {
                cases
                    .iter()
                    .filter_map(|case_id| chains.get(case_id))
                    .flatten()
                    .filter(|b| b.project_id == project_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        blocks.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.case_id.cmp(&b.case_id))
                .then(a.height.cmp(&b.height))
        });
        Ok(blocks)
    }

    async fn case_ids(&self) -> Result<Vec<String>, StoreError> {
        let chains = self.chains.read().await;
        let mut ids: Vec<String> = chains
            .iter()
            .filter(|(_, chain)| !chain.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
