//! Repair of stage records that lost their block.
//!
//! A failed rollback or a store that timed out can leave a stage record
//! version whose block was never appended. Reconciliation drops such
//! versions and keeps those whose block did land. The opposite case, a block
//! whose record write was lost, cannot be rebuilt from the block alone and
//! is only reported.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use land_ledger::EventType;

use crate::engine::WorkflowEngine;
use crate::error::WorkflowError;
use crate::stage::{Stage, StageStatus};

/// A stage record version removed by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedVersion {
    pub record_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    /// Block the version pointed at, absent from the chain
    pub block_id: String,
}

/// Outcome of reconciling one case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub case_id: String,
    pub discarded: Vec<DiscardedVersion>,
    /// Blocks that change a record but no record references
    pub unrecorded_blocks: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.discarded.is_empty() && self.unrecorded_blocks.is_empty()
    }
}

impl WorkflowEngine {
    /// Reconcile stage records of a case with its chain.
    pub async fn reconcile(&self, case_id: &str) -> Result<ReconcileReport, WorkflowError> {
        let _guard = self.locks.lock(case_id).await;
        self.reconcile_locked(case_id).await
    }

    /// Whether the case awaits reconciliation before its next write.
    pub fn needs_reconcile(&self, case_id: &str) -> bool {
        self.needs_reconcile.contains(case_id)
    }

    /// Body of [`WorkflowEngine::reconcile`]; the caller holds the case lock.
    pub(crate) async fn reconcile_locked(&self, case_id: &str) -> Result<ReconcileReport, WorkflowError> {
        let blocks = self
            .timed("read chain", self.ledger.blocks_for(case_id))
            .await?;
        let known: HashSet<&str> = blocks.iter().map(|b| b.block_id.as_str()).collect();

        let mut report = ReconcileReport {
            case_id: case_id.to_string(),
            ..Default::default()
        };

        let records = self
            .timed("read records", self.stages.records_for(case_id))
            .await?;
        for record in &records {
            let mut latest = Some(record.clone());
            while let Some(version) = latest.take() {
                let Some(block_id) = version.latest_block_id() else {
                    break;
                };
                if known.contains(block_id) {
                    break;
                }

                report.discarded.push(DiscardedVersion {
                    record_id: version.record_id.clone(),
                    stage: version.stage,
                    status: version.status,
                    block_id: block_id.to_string(),
                });
                self.timed(
                    "discard record version",
                    self.stages.discard_latest(case_id, &version.record_id),
                )
                .await?;

                latest = self
                    .timed("read versions", self.stages.versions(case_id, &version.record_id))
                    .await?
                    .pop();
            }
        }

        let remaining = self
            .timed("read records", self.stages.records_for(case_id))
            .await?;
        let referenced: HashSet<&str> = remaining
            .iter()
            .flat_map(|r| r.history.iter().map(|c| c.block_id.as_str()))
            .collect();
        report.unrecorded_blocks = blocks
            .iter()
            .filter(|b| b.event_type != EventType::StatusUpdated)
            .filter(|b| !referenced.contains(b.block_id.as_str()))
            .map(|b| b.block_id.clone())
            .collect();

        self.needs_reconcile.remove(case_id);

        if report.is_clean() {
            tracing::debug!(case_id = %case_id, "Case reconciled, nothing to repair");
        } else {
            tracing::warn!(
                case_id = %case_id,
                discarded = report.discarded.len(),
                unrecorded = report.unrecorded_blocks.len(),
                "Reconciled case"
            );
        }
        Ok(report)
    }
}
