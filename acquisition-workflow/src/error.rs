//! Workflow error types.

use land_ledger::StoreError;

use crate::stage::Stage;
use crate::stage_store::StageStoreError;

/// Errors surfaced by the workflow engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    /// The stage this transition depends on has no active record
    #[error("Cannot {attempted} for case {case_id}: {requires} stage is missing")]
    PrecedingStageMissing {
        case_id: String,
        /// Operation that was refused
        attempted: String,
        requires: Stage,
    },

    /// An active record for the stage already exists
    #[error("Case {case_id} already has an active {stage} record")]
    DuplicateStage { case_id: String, stage: Stage },

    /// Another writer changed the case first; retry the whole transition
    #[error("Concurrent write conflict on case {case_id}")]
    ConcurrentWriteConflict { case_id: String },

    /// The case chain failed verification; writes are refused until cleared
    #[error("Hash chain broken for case {case_id} at block {}", block_id.as_deref().unwrap_or("<unknown>"))]
    HashChainBroken {
        case_id: String,
        block_id: Option<String>,
    },

    /// A store call failed or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The stage record exists but is in the wrong status for the transition
    #[error("Invalid {stage} state for case {case_id}: {reason}")]
    InvalidStageState {
        case_id: String,
        stage: Stage,
        reason: String,
    },

    /// The request itself is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl WorkflowError {
    /// Whether retrying the same transition may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentWriteConflict { .. } | Self::StoreUnavailable(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PrecedingStageMissing { .. } => "PRECEDING_STAGE_MISSING",
            Self::DuplicateStage { .. } => "DUPLICATE_STAGE",
            Self::ConcurrentWriteConflict { .. } => "CONCURRENT_WRITE_CONFLICT",
            Self::HashChainBroken { .. } => "HASH_CHAIN_BROKEN",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::InvalidStageState { .. } => "INVALID_STAGE_STATE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::ConcurrentWriteConflict { case_id } => {
                Self::ConcurrentWriteConflict { case_id }
            }
            // A colliding block id is a lost race on the same tip
            StoreError::DuplicateBlock { case_id, .. } => Self::ConcurrentWriteConflict { case_id },
        }
    }
}

impl From<StageStoreError> for WorkflowError {
    fn from(err: StageStoreError) -> Self {
        match err {
            StageStoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StageStoreError::DuplicateStage { case_id, stage } => Self::DuplicateStage { case_id, stage },
            StageStoreError::Conflict { case_id, .. } => Self::ConcurrentWriteConflict { case_id },
        }
    }
}
