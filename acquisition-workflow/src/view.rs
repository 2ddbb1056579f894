//! Read-only views over cases and projects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use land_ledger::verifier::{annotate, verify_chain};
use land_ledger::{LedgerBlock, VerificationReport};

use crate::engine::WorkflowEngine;
use crate::error::WorkflowError;
use crate::flags::CaseFlag;
use crate::stage::{derive_case_stage, CaseStage, StageRecord};

/// Everything known about a case at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseStatus {
    pub case_id: String,
    /// Position in the state machine, from active records
    pub stage: CaseStage,
    /// Latest version of every record, retracted ones included
    pub records: Vec<StageRecord>,
    /// Case chain with `is_valid` filled in
    pub blocks: Vec<LedgerBlock>,
    pub verification: VerificationReport,
    /// Present while writes to the case are refused
    pub flag: Option<CaseFlag>,
}

impl CaseStatus {
    pub fn is_flagged(&self) -> bool {
        self.flag.is_some()
    }
}

/// Case counts for one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectProgress {
    pub project_id: String,
    pub total_cases: usize,
    /// Payment released
    pub completed: usize,
    /// Awarded but not yet paid
    pub in_progress: usize,
    /// Measured only, or every record retracted
    pub pending: usize,
    /// Payment failed and not yet retried
    pub failed: usize,
    pub by_stage: BTreeMap<CaseStage, usize>,
}

impl ProjectProgress {
    fn count(&mut self, stage: CaseStage) {
        self.total_cases += 1;
        *self.by_stage.entry(stage).or_default() += 1;
        match stage {
            CaseStage::PaymentCompleted => self.completed += 1,
            CaseStage::PaymentFailed => self.failed += 1,
            CaseStage::None | CaseStage::Measured => self.pending += 1,
            _ => self.in_progress += 1,
        }
    }

    /// Share of cases with payment released, 0.0 - 1.0.
    pub fn completion_ratio(&self) -> f64 {
        if self.total_cases == 0 {
            0.0
        } else {
            self.completed as f64 / self.total_cases as f64
        }
    }
}

impl WorkflowEngine {
    /// Snapshot of a case with its chain verified.
    ///
    /// Reads under the case lock so records and blocks agree. A failing
    /// chain flags the case; otherwise nothing is written, and repeated
    /// calls return identical results.
    pub async fn get_case_status(&self, case_id: &str) -> Result<CaseStatus, WorkflowError> {
        let _guard = self.locks.lock(case_id).await;

        let blocks = self
            .timed("read chain", self.ledger.blocks_for(case_id))
            .await?;
        let records = self
            .timed("read records", self.stages.records_for(case_id))
            .await?;

        let verification = verify_chain(case_id, &blocks);
        if !verification.valid {
            self.flags.raise(
                case_id,
                verification.broken_block_id().map(str::to_string),
            );
        }

        Ok(CaseStatus {
            case_id: case_id.to_string(),
            stage: derive_case_stage(&records),
            blocks: annotate(blocks.as_slice(), &verification),
            records,
            verification,
            flag: self.flags.get(case_id),
        })
    }

    /// Case counts by state for a project.
    pub async fn project_progress(&self, project_id: &str) -> Result<ProjectProgress, WorkflowError> {
        let case_ids = self
            .timed("read project cases", self.stages.case_ids_for_project(project_id))
            .await?;

        let mut progress = ProjectProgress {
            project_id: project_id.to_string(),
            ..Default::default()
        };

        for case_id in case_ids {
            // Writes in flight may still be rolled back
            let _guard = self.locks.lock(&case_id).await;
            let records = self
                .timed("read records", self.stages.records_for(&case_id))
                .await?;
            let in_project: Vec<&StageRecord> = records
                .iter()
                .filter(|r| r.project_id == project_id)
                .collect();
            if in_project.is_empty() {
                continue;
            }
            progress.count(derive_case_stage(in_project));
        }

        tracing::debug!(
            project_id = %project_id,
            total = progress.total_cases,
            completed = progress.completed,
            "Computed project progress"
        );
        Ok(progress)
    }

    /// Every block tagged with a project, oldest first.
    pub async fn project_history(&self, project_id: &str) -> Result<Vec<LedgerBlock>, WorkflowError> {
        self.timed("read project history", self.ledger.blocks_for_project(project_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_buckets() {
        let mut progress = ProjectProgress::default();
        for stage in [
            CaseStage::Measured,
            CaseStage::Awarded,
            CaseStage::DocumentsCollected,
            CaseStage::PaymentCompleted,
            CaseStage::PaymentFailed,
        ] {
            progress.count(stage);
        }

        assert_eq!(progress.total_cases, 5);
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.in_progress, 2);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.by_stage.get(&CaseStage::Awarded), Some(&1));
        assert!((progress.completion_ratio() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_progress_ratio() {
        assert_eq!(ProjectProgress::default().completion_ratio(), 0.0);
    }
}
