//! Bulk transitions across many cases.
//!
//! A batch holds items of one transition kind, each for its own case. Items
//! run concurrently; items of the same case still queue on its lock. One
//! failing item never aborts the rest.

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::engine::{Transition, WorkflowEngine};
use crate::error::WorkflowError;
use crate::stage::{AttachmentRef, AwardPayload, MeasurementPayload, NoticePayload, PaymentPayload};

/// One case and the payload for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInput<T> {
    pub case_id: String,
    pub payload: T,
}

impl<T> CaseInput<T> {
    pub fn new(case_id: impl Into<String>, payload: T) -> Self {
        Self {
            case_id: case_id.into(),
            payload,
        }
    }
}

/// Items of a single transition kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum BulkBatch {
    Measurement(Vec<CaseInput<MeasurementPayload>>),
    Award(Vec<CaseInput<AwardPayload>>),
    Notice(Vec<CaseInput<NoticePayload>>),
    Documents(Vec<CaseInput<Vec<AttachmentRef>>>),
    Payment(Vec<CaseInput<PaymentPayload>>),
    /// Payload is the settlement reference
    Release(Vec<CaseInput<String>>),
}

impl BulkBatch {
    pub fn len(&self) -> usize {
        match self {
            Self::Measurement(items) => items.len(),
            Self::Award(items) => items.len(),
            Self::Notice(items) => items.len(),
            Self::Documents(items) => items.len(),
            Self::Payment(items) => items.len(),
            Self::Release(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bulk request, attributed to one officer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub officer_id: String,
    #[serde(flatten)]
    pub batch: BulkBatch,
}

/// Outcome of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub case_id: String,
    pub success: bool,
    /// Block minted on success
    pub block_id: Option<String>,
    pub error: Option<String>,
    pub code: Option<String>,
}

impl BulkItemResult {
    fn from_result(case_id: String, result: Result<Transition, WorkflowError>) -> Self {
        match result {
            Ok(transition) => Self {
                case_id,
                success: true,
                block_id: Some(transition.block.block_id),
                error: None,
                code: None,
            },
            Err(err) => Self {
                case_id,
                success: false,
                block_id: None,
                code: Some(err.code().to_string()),
                error: Some(err.to_string()),
            },
        }
    }
}

/// Per-item results in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkOutcome {
    fn from_results(results: Vec<BulkItemResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

impl WorkflowEngine {
    /// Run every item of a batch and collect per-item outcomes.
    pub async fn bulk(&self, request: BulkRequest) -> BulkOutcome {
        let officer = request.officer_id.as_str();
        let total = request.batch.len();

        let results = match request.batch {
            BulkBatch::Measurement(items) => {
                join_all(items.into_iter().map(|item| async move {
                    let result = self.record_measurement(&item.case_id, item.payload, officer).await;
                    BulkItemResult::from_result(item.case_id, result)
                }))
                .await
            }
            BulkBatch::Award(items) => {
                join_all(items.into_iter().map(|item| async move {
                    let result = self.declare_award(&item.case_id, item.payload, officer).await;
                    BulkItemResult::from_result(item.case_id, result)
                }))
                .await
            }
            BulkBatch::Notice(items) => {
                join_all(items.into_iter().map(|item| async move {
                    let result = self.generate_notice(&item.case_id, item.payload, officer).await;
                    BulkItemResult::from_result(item.case_id, result)
                }))
                .await
            }
            BulkBatch::Documents(items) => {
                join_all(items.into_iter().map(|item| async move {
                    let result = self.upload_documents(&item.case_id, item.payload, officer).await;
                    BulkItemResult::from_result(item.case_id, result)
                }))
                .await
            }
            BulkBatch::Payment(items) => {
                join_all(items.into_iter().map(|item| async move {
                    let result = self.create_payment_slip(&item.case_id, item.payload, officer).await;
                    BulkItemResult::from_result(item.case_id, result)
                }))
                .await
            }
            BulkBatch::Release(items) => {
                join_all(items.into_iter().map(|item| async move {
                    let result = self.release_payment(&item.case_id, &item.payload, officer).await;
                    BulkItemResult::from_result(item.case_id, result)
                }))
                .await
            }
        };

        let outcome = BulkOutcome::from_results(results);
        tracing::info!(
            officer_id = %officer,
            total,
            successful = outcome.successful,
            failed = outcome.failed,
            "Bulk transition finished"
        );
        outcome
    }
}
