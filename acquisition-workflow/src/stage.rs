//! Stage records and their payloads.
//!
//! A case moves through four recorded stages. Each stage record carries the
//! latest status and details plus the full history of status changes; every
//! history entry names the ledger block that justified it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::WorkflowError;

/// Recorded stages in legal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Measurement,
    Award,
    Notice,
    Payment,
}

impl Stage {
    /// Stage that must be active before this one may be recorded.
    pub fn requires(&self) -> Option<Stage> {
        match self {
            Self::Measurement => None,
            Self::Award => Some(Self::Measurement),
            Self::Notice => Some(Self::Award),
            Self::Payment => Some(Self::Notice),
        }
    }

    /// Stage that depends on this one.
    pub fn successor(&self) -> Option<Stage> {
        match self {
            Self::Measurement => Some(Self::Award),
            Self::Award => Some(Self::Notice),
            Self::Notice => Some(Self::Payment),
            Self::Payment => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measurement => "measurement",
            Self::Award => "award",
            Self::Notice => "notice",
            Self::Payment => "payment",
        }
    }

    pub fn all() -> [Stage; 4] {
        [Self::Measurement, Self::Award, Self::Notice, Self::Payment]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a case in the acquisition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStage {
    None,
    Measured,
    Awarded,
    NoticeIssued,
    DocumentsCollected,
    PaymentInitiated,
    PaymentCompleted,
    /// Side exit from `PaymentInitiated`; retract the payment to retry
    PaymentFailed,
}

/// Status values across all stage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    // Measurement
    Recorded,
    AwardGenerated,
    // Award and notice start as drafts
    Draft,
    NoticeGenerated,
    // Notice
    DocumentsUploaded,
    PaymentInitiated,
    PaymentCompleted,
    // Payment
    Pending,
    Success,
    Failed,
    /// Any stage, terminal
    Retracted,
}

/// One entry in a stage record's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: StageStatus,
    /// Ledger block that recorded this change
    pub block_id: String,
    pub officer_id: String,
    pub changed_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl StatusChange {
    pub fn new(
        status: StageStatus,
        officer_id: impl Into<String>,
        block_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            block_id: block_id.into(),
            officer_id: officer_id.into(),
            changed_at: at,
            reason: None,
        }
    }
}

/// Stage-specific payload of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageDetails {
    Measurement(MeasurementDetails),
    Award(AwardDetails),
    Notice(NoticeDetails),
    Payment(PaymentDetails),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementDetails {
    pub measured_area: f64,
    pub unit: String,
    pub village: Option<String>,
    pub taluka: Option<String>,
    pub district: Option<String>,
    pub land_type: Option<String>,
    pub landowner_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardDetails {
    pub award_number: String,
    pub award_date: DateTime<Utc>,
    pub base_amount: f64,
    pub solatium: f64,
    pub additional_amounts: BTreeMap<String, f64>,
    /// base + solatium + every additional amount
    pub total_amount: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeType {
    #[default]
    Acquisition,
    Compensation,
    Eviction,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeDetails {
    pub notice_number: String,
    pub amount: f64,
    pub notice_type: NoticeType,
    pub objection_deadline: DateTime<Utc>,
    pub description: String,
    /// Fingerprint of the latest uploaded attachment set
    pub document_fingerprint: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Rtgs,
    Neft,
    Imps,
    Cheque,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub payment_number: String,
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub reason_if_pending: Option<String>,
    /// Reference from the settlement gateway, set on release
    pub settlement_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub notes: Option<String>,
}

/// Reference to a stored document, already resolved by the caller.
///
/// Only references are fingerprinted; file bytes never reach the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub uri: String,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// A stage record of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub record_id: String,
    /// Survey number
    pub case_id: String,
    pub stage: Stage,
    pub project_id: String,
    /// Officer who created the record
    pub officer_id: String,
    pub created_at: DateTime<Utc>,
    /// Latest status; equals the last history entry
    pub status: StageStatus,
    pub retracted: bool,
    pub details: StageDetails,
    pub history: Vec<StatusChange>,
}

impl StageRecord {
    /// Create a record whose history starts with `origin`.
    pub fn new(
        record_id: impl Into<String>,
        case_id: impl Into<String>,
        project_id: impl Into<String>,
        stage: Stage,
        details: StageDetails,
        origin: StatusChange,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            case_id: case_id.into(),
            stage,
            project_id: project_id.into(),
            officer_id: origin.officer_id.clone(),
            created_at: origin.changed_at,
            status: origin.status,
            retracted: false,
            details,
            history: vec![origin],
        }
    }

    /// Whether the record still counts for stage ordering.
    pub fn is_active(&self) -> bool {
        !self.retracted
    }

    /// Copy with a status change appended.
    pub fn with_status(
        &self,
        status: StageStatus,
        officer_id: &str,
        block_id: &str,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.retracted = status == StageStatus::Retracted;
        next.history.push(StatusChange {
            status,
            block_id: block_id.to_string(),
            officer_id: officer_id.to_string(),
            changed_at: at,
            reason,
        });
        next
    }

    /// Block that created the record.
    pub fn origin_block_id(&self) -> Option<&str> {
        self.history.first().map(|c| c.block_id.as_str())
    }

    /// Block behind the latest status change.
    pub fn latest_block_id(&self) -> Option<&str> {
        self.history.last().map(|c| c.block_id.as_str())
    }

    pub fn award(&self) -> Option<&AwardDetails> {
        match &self.details {
            StageDetails::Award(d) => Some(d),
            _ => None,
        }
    }

    pub fn notice(&self) -> Option<&NoticeDetails> {
        match &self.details {
            StageDetails::Notice(d) => Some(d),
            _ => None,
        }
    }

    pub fn payment(&self) -> Option<&PaymentDetails> {
        match &self.details {
            StageDetails::Payment(d) => Some(d),
            _ => None,
        }
    }
}

/// Derive the state-machine position from the active records of a case.
pub fn derive_case_stage<'a>(records: impl IntoIterator<Item = &'a StageRecord>) -> CaseStage {
    let mut stage = CaseStage::None;
    let mut payment: Option<StageStatus> = None;
    let mut documents = false;

    for record in records.into_iter().filter(|r| r.is_active()) {
        let reached = match record.stage {
            Stage::Measurement => CaseStage::Measured,
            Stage::Award => CaseStage::Awarded,
            Stage::Notice => {
                documents = record
                    .notice()
                    .map(|n| n.document_fingerprint.is_some())
                    .unwrap_or(false);
                CaseStage::NoticeIssued
            }
            Stage::Payment => {
                payment = Some(record.status);
                CaseStage::PaymentInitiated
            }
        };
        stage = stage.max(reached);
    }

    match (stage, payment) {
        (_, Some(StageStatus::Success)) => CaseStage::PaymentCompleted,
        (_, Some(StageStatus::Failed)) => CaseStage::PaymentFailed,
        (CaseStage::NoticeIssued, None) if documents => CaseStage::DocumentsCollected,
        (stage, _) => stage,
    }
}

// === Payloads accepted by the engine ===

/// Input for `record_measurement`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPayload {
    pub project_id: String,
    pub measured_area: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default)]
    pub taluka: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub land_type: Option<String>,
    #[serde(default)]
    pub landowner_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl MeasurementPayload {
    pub fn new(project_id: impl Into<String>, measured_area: f64) -> Self {
        Self {
            project_id: project_id.into(),
            measured_area,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.project_id.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest("project_id is required".to_string()));
        }
        if !self.measured_area.is_finite() || self.measured_area <= 0.0 {
            return Err(WorkflowError::InvalidRequest(format!(
                "measured_area must be positive, got {}",
                self.measured_area
            )));
        }
        Ok(())
    }
}

/// Input for `declare_award`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwardPayload {
    /// Defaults to the measurement's project
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub award_number: Option<String>,
    #[serde(default)]
    pub award_date: Option<DateTime<Utc>>,
    pub base_amount: f64,
    #[serde(default)]
    pub solatium: f64,
    #[serde(default)]
    pub additional_amounts: BTreeMap<String, f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AwardPayload {
    pub fn new(base_amount: f64, solatium: f64) -> Self {
        Self {
            base_amount,
            solatium,
            ..Default::default()
        }
    }

    pub fn total_amount(&self) -> f64 {
        self.base_amount + self.solatium + self.additional_amounts.values().sum::<f64>()
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        let amounts = [("base_amount", self.base_amount), ("solatium", self.solatium)]
            .into_iter()
            .chain(self.additional_amounts.iter().map(|(k, v)| (k.as_str(), *v)));

        for (name, amount) in amounts {
            if !amount.is_finite() || amount < 0.0 {
                return Err(WorkflowError::InvalidRequest(format!(
                    "{} must be a non-negative amount, got {}",
                    name, amount
                )));
            }
        }
        Ok(())
    }
}

/// Input for `generate_notice`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoticePayload {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub notice_number: Option<String>,
    /// Defaults to the award total
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub notice_type: Option<NoticeType>,
    /// Defaults to the configured objection window after the event
    #[serde(default)]
    pub objection_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NoticePayload {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        match self.amount {
            Some(amount) if !amount.is_finite() || amount < 0.0 => Err(WorkflowError::InvalidRequest(
                format!("amount must be non-negative, got {}", amount),
            )),
            _ => Ok(()),
        }
    }
}

/// Input for `create_payment_slip`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub payment_number: Option<String>,
    /// Defaults to the notice amount
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub reason_if_pending: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl PaymentPayload {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        match self.amount {
            Some(amount) if !amount.is_finite() || amount <= 0.0 => Err(WorkflowError::InvalidRequest(
                format!("amount must be positive, got {}", amount),
            )),
            _ => Ok(()),
        }
    }
}
