//! The acquisition workflow engine.
//!
//! Every write runs under the case lock:
//!
//! 1. refuse if the case is flagged, repair if it needs reconciliation
//! 2. verify the case chain
//! 3. check that the required stage exists and the new one does not
//! 4. mint the block, apply the stage writes, append the block
//!
//! If the append is rejected the stage writes are reverted before the lock
//! is released, so a stage record never exists without its block. A store
//! that times out leaves the outcome unknown; the case is then reconciled
//! against its chain before the next write.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

use land_ledger::{
    compute_hash, canonical_json, BlockBuilder, BlockDraft, EventType, IntegrityVerifier,
    LedgerBlock, LedgerStore, VerificationReport,
};

use crate::config::EngineConfig;
use crate::error::WorkflowError;
use crate::flags::{CaseFlag, CaseFlags};
use crate::locks::CaseLocks;
use crate::stage::{
    AttachmentRef, AwardDetails, AwardPayload, MeasurementDetails, MeasurementPayload,
    NoticeDetails, NoticePayload, PaymentDetails, PaymentPayload, Stage, StageDetails,
    StageRecord, StageStatus, StatusChange,
};
use crate::stage_store::{StageStore, StageWrite};

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// The record created or changed by the transition
    pub record: StageRecord,
    /// The block that records it
    pub block: LedgerBlock,
}

/// Serializes, validates and records stage transitions.
pub struct WorkflowEngine {
    pub(crate) config: EngineConfig,
    pub(crate) ledger: Arc<dyn LedgerStore>,
    pub(crate) stages: Arc<dyn StageStore>,
    builder: BlockBuilder,
    verifier: IntegrityVerifier,
    pub(crate) locks: CaseLocks,
    pub(crate) flags: CaseFlags,
    /// Cases whose stage records may disagree with their chain
    pub(crate) needs_reconcile: DashSet<String>,
}

impl WorkflowEngine {
    /// Create an engine with default configuration.
    pub fn new(ledger: Arc<dyn LedgerStore>, stages: Arc<dyn StageStore>) -> Self {
        Self::with_config(ledger, stages, EngineConfig::default())
    }

    pub fn with_config(
        ledger: Arc<dyn LedgerStore>,
        stages: Arc<dyn StageStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            builder: BlockBuilder::new(ledger.clone()),
            verifier: IntegrityVerifier::new(ledger.clone()),
            config,
            ledger,
            stages,
            locks: CaseLocks::new(),
            flags: CaseFlags::new(),
            needs_reconcile: DashSet::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // === Transitions ===

    /// Record the measurement of a case. This starts the case chain.
    pub async fn record_measurement(
        &self,
        case_id: &str,
        payload: MeasurementPayload,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        payload.validate()?;

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        self.ensure_absent(case_id, Stage::Measurement).await?;

        let now = self.clock(case_id).await?;
        let unit = payload
            .unit
            .clone()
            .unwrap_or_else(|| self.config.default_unit.clone());
        let record_id = new_record_id();

        let mut draft = BlockDraft::new(case_id, EventType::MeasurementRecorded, officer_id, &payload.project_id)
            .with_meta("record_id", record_id.as_str())
            .with_meta("measured_area", payload.measured_area)
            .with_meta("unit", unit.as_str())
            .with_remarks(format!("Measurement recorded: {} {}", payload.measured_area, unit));
        for (key, value) in [
            ("village", &payload.village),
            ("taluka", &payload.taluka),
            ("district", &payload.district),
            ("land_type", &payload.land_type),
            ("landowner_name", &payload.landowner_name),
        ] {
            draft = with_optional(draft, key, value);
        }

        let block = self.build(draft, now).await?;
        let details = StageDetails::Measurement(MeasurementDetails {
            measured_area: payload.measured_area,
            unit,
            village: payload.village,
            taluka: payload.taluka,
            district: payload.district,
            land_type: payload.land_type,
            landowner_name: payload.landowner_name,
            notes: payload.notes,
        });
        let record = new_record(
            record_id,
            &block,
            Stage::Measurement,
            StageStatus::Recorded,
            details,
        );

        let block = self
            .commit(block, vec![StageWrite::Insert(record.clone())])
            .await?;
        Ok(Transition { record, block })
    }

    /// Declare the compensation award. Requires a measurement.
    pub async fn declare_award(
        &self,
        case_id: &str,
        payload: AwardPayload,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        payload.validate()?;

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        let measurement = self
            .require(case_id, Stage::Measurement, "declare award")
            .await?;
        self.ensure_absent(case_id, Stage::Award).await?;

        let now = self.clock(case_id).await?;
        let project_id = payload
            .project_id
            .clone()
            .unwrap_or_else(|| measurement.project_id.clone());
        let award_number = payload
            .award_number
            .clone()
            .unwrap_or_else(|| format!("AWD-{}", case_id));
        let award_date = payload.award_date.unwrap_or(now);
        let total_amount = payload.total_amount();
        let record_id = new_record_id();

        let draft = BlockDraft::new(case_id, EventType::AwardDeclared, officer_id, &project_id)
            .with_meta("record_id", record_id.as_str())
            .with_meta("award_number", award_number.as_str())
            .with_meta("award_date", award_date.to_rfc3339())
            .with_meta("base_amount", payload.base_amount)
            .with_meta("solatium", payload.solatium)
            .with_meta("additional_amounts", json!(payload.additional_amounts))
            .with_meta("total_amount", total_amount)
            .with_remarks(format!("Award {} declared: total {:.2}", award_number, total_amount));

        let block = self.build(draft, now).await?;
        let details = StageDetails::Award(AwardDetails {
            award_number,
            award_date,
            base_amount: payload.base_amount,
            solatium: payload.solatium,
            additional_amounts: payload.additional_amounts,
            total_amount,
            notes: payload.notes,
        });
        let record = new_record(record_id, &block, Stage::Award, StageStatus::Draft, details);
        let measured = advance(&measurement, StageStatus::AwardGenerated, &block, None);

        let block = self
            .commit(
                block,
                vec![
                    StageWrite::Insert(record.clone()),
                    StageWrite::Update {
                        before: measurement,
                        after: measured,
                    },
                ],
            )
            .await?;
        Ok(Transition { record, block })
    }

    /// Generate the acquisition notice. Requires an award.
    pub async fn generate_notice(
        &self,
        case_id: &str,
        payload: NoticePayload,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        payload.validate()?;

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        let award = self.require(case_id, Stage::Award, "generate notice").await?;
        self.ensure_absent(case_id, Stage::Notice).await?;

        let now = self.clock(case_id).await?;
        let project_id = payload
            .project_id
            .clone()
            .unwrap_or_else(|| award.project_id.clone());
        let notice_number = payload
            .notice_number
            .clone()
            .unwrap_or_else(|| format!("NT-{}", case_id));
        let amount = payload
            .amount
            .or_else(|| award.award().map(|a| a.total_amount))
            .unwrap_or_default();
        let notice_type = payload.notice_type.unwrap_or_default();
        let objection_deadline = payload
            .objection_deadline
            .unwrap_or_else(|| now + Duration::days(self.config.notice_objection_days));
        let description = payload.description.clone().unwrap_or_default();
        let record_id = new_record_id();

        let draft = BlockDraft::new(case_id, EventType::NoticeGenerated, officer_id, &project_id)
            .with_meta("record_id", record_id.as_str())
            .with_meta("notice_number", notice_number.as_str())
            .with_meta("amount", amount)
            .with_meta("notice_type", json!(notice_type))
            .with_meta("objection_deadline", objection_deadline.to_rfc3339())
            .with_remarks(format!("Notice {} generated", notice_number));

        let block = self.build(draft, now).await?;
        let details = StageDetails::Notice(NoticeDetails {
            notice_number,
            amount,
            notice_type,
            objection_deadline,
            description,
            document_fingerprint: None,
            attachments: Vec::new(),
        });
        let record = new_record(record_id, &block, Stage::Notice, StageStatus::Draft, details);
        let awarded = advance(&award, StageStatus::NoticeGenerated, &block, None);

        let block = self
            .commit(
                block,
                vec![
                    StageWrite::Insert(record.clone()),
                    StageWrite::Update {
                        before: award,
                        after: awarded,
                    },
                ],
            )
            .await?;
        Ok(Transition { record, block })
    }

    /// Attach collected documents to the notice.
    ///
    /// Only references are fingerprinted. Repeated uploads are allowed; each
    /// one mints a block and replaces the notice's attachment set.
    pub async fn upload_documents(
        &self,
        case_id: &str,
        attachments: Vec<AttachmentRef>,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        if attachments.is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "at least one attachment is required".to_string(),
            ));
        }
        if attachments.iter().any(|a| a.uri.trim().is_empty()) {
            return Err(WorkflowError::InvalidRequest(
                "attachment uri must not be empty".to_string(),
            ));
        }

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        let notice = self.require(case_id, Stage::Notice, "upload documents").await?;

        let now = self.clock(case_id).await?;
        let fingerprint = document_fingerprint(&attachments);

        let draft = BlockDraft::new(case_id, EventType::DocumentsUploaded, officer_id, &notice.project_id)
            .with_meta("record_id", notice.record_id.as_str())
            .with_meta("document_fingerprint", fingerprint.as_str())
            .with_meta("attachment_count", attachments.len())
            .with_meta("attachments", json!(attachments))
            .with_remarks(format!("{} document(s) uploaded", attachments.len()));

        let block = self.build(draft, now).await?;

        // Later uploads keep whatever status the notice has reached
        let status = match notice.status {
            StageStatus::Draft => StageStatus::DocumentsUploaded,
            other => other,
        };
        let mut updated = advance(&notice, status, &block, None);
        if let StageDetails::Notice(details) = &mut updated.details {
            details.document_fingerprint = Some(fingerprint);
            details.attachments = attachments;
        }

        let block = self
            .commit(
                block,
                vec![StageWrite::Update {
                    before: notice,
                    after: updated.clone(),
                }],
            )
            .await?;
        Ok(Transition {
            record: updated,
            block,
        })
    }

    /// Create the payment slip. Requires a notice.
    pub async fn create_payment_slip(
        &self,
        case_id: &str,
        payload: PaymentPayload,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        payload.validate()?;

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        let notice = self
            .require(case_id, Stage::Notice, "create payment slip")
            .await?;
        self.ensure_absent(case_id, Stage::Payment).await?;

        let now = self.clock(case_id).await?;
        let project_id = payload
            .project_id
            .clone()
            .unwrap_or_else(|| notice.project_id.clone());
        let payment_number = payload
            .payment_number
            .clone()
            .unwrap_or_else(|| format!("PAY-{}", case_id));
        let amount = payload
            .amount
            .or_else(|| notice.notice().map(|n| n.amount))
            .unwrap_or_default();
        let payment_method = payload.payment_method.unwrap_or_default();
        let record_id = new_record_id();

        let draft = BlockDraft::new(case_id, EventType::PaymentSlipCreated, officer_id, &project_id)
            .with_meta("record_id", record_id.as_str())
            .with_meta("payment_number", payment_number.as_str())
            .with_meta("amount", amount)
            .with_meta("payment_method", json!(payment_method))
            .with_remarks(format!("Payment slip {} created for {:.2}", payment_number, amount));
        let draft = with_optional(draft, "reason_if_pending", &payload.reason_if_pending);

        let block = self.build(draft, now).await?;
        let details = StageDetails::Payment(PaymentDetails {
            payment_number,
            amount,
            payment_method,
            reason_if_pending: payload.reason_if_pending,
            settlement_ref: None,
            failure_reason: None,
            notes: payload.notes,
        });
        let record = new_record(record_id, &block, Stage::Payment, StageStatus::Pending, details);
        let initiated = advance(&notice, StageStatus::PaymentInitiated, &block, None);

        let block = self
            .commit(
                block,
                vec![
                    StageWrite::Insert(record.clone()),
                    StageWrite::Update {
                        before: notice,
                        after: initiated,
                    },
                ],
            )
            .await?;
        Ok(Transition { record, block })
    }

    /// Mark a pending payment as settled.
    pub async fn release_payment(
        &self,
        case_id: &str,
        settlement_ref: &str,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        if settlement_ref.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "settlement_ref is required".to_string(),
            ));
        }

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        let payment = self.pending_payment(case_id, "release payment").await?;
        let notice = self.require(case_id, Stage::Notice, "release payment").await?;

        let amount = payment.payment().map(|p| p.amount).unwrap_or_default();
        let draft = BlockDraft::new(case_id, EventType::PaymentReleased, officer_id, &payment.project_id)
            .with_meta("record_id", payment.record_id.as_str())
            .with_meta("amount", amount)
            .with_meta("settlement_ref", settlement_ref)
            .with_remarks(format!("Payment of {:.2} released", amount));

        let block = self.build(draft, self.clock(case_id).await?).await?;
        let mut released = advance(&payment, StageStatus::Success, &block, None);
        if let StageDetails::Payment(details) = &mut released.details {
            details.settlement_ref = Some(settlement_ref.to_string());
        }
        let completed = advance(&notice, StageStatus::PaymentCompleted, &block, None);

        let block = self
            .commit(
                block,
                vec![
                    StageWrite::Update {
                        before: payment,
                        after: released.clone(),
                    },
                    StageWrite::Update {
                        before: notice,
                        after: completed,
                    },
                ],
            )
            .await?;
        Ok(Transition {
            record: released,
            block,
        })
    }

    /// Mark a pending payment as failed.
    pub async fn fail_payment(
        &self,
        case_id: &str,
        reason: &str,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        if reason.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest("reason is required".to_string()));
        }

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        let payment = self.pending_payment(case_id, "fail payment").await?;

        let draft = BlockDraft::new(case_id, EventType::PaymentFailed, officer_id, &payment.project_id)
            .with_meta("record_id", payment.record_id.as_str())
            .with_meta("reason", reason)
            .with_remarks(format!("Payment failed: {}", reason));

        let block = self.build(draft, self.clock(case_id).await?).await?;
        let mut failed = advance(&payment, StageStatus::Failed, &block, Some(reason.to_string()));
        if let StageDetails::Payment(details) = &mut failed.details {
            details.failure_reason = Some(reason.to_string());
        }

        let block = self
            .commit(
                block,
                vec![StageWrite::Update {
                    before: payment,
                    after: failed.clone(),
                }],
            )
            .await?;
        Ok(Transition {
            record: failed,
            block,
        })
    }

    /// Record an ad hoc note against an active stage. No status changes.
    pub async fn record_status_update(
        &self,
        case_id: &str,
        stage: Stage,
        note: &str,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        if note.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest("note is required".to_string()));
        }

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        let record = self.require(case_id, stage, "record status update").await?;

        let draft = BlockDraft::new(case_id, EventType::StatusUpdated, officer_id, &record.project_id)
            .with_meta("record_id", record.record_id.as_str())
            .with_meta("stage", stage.as_str())
            .with_meta("status", json!(record.status))
            .with_remarks(note);

        let block = self.build(draft, self.clock(case_id).await?).await?;
        let block = self.commit(block, Vec::new()).await?;
        Ok(Transition { record, block })
    }

    /// Withdraw the latest active stage so it can be recorded again.
    ///
    /// The prior stage returns to the status it had before the withdrawn
    /// stage was recorded. Released payments cannot be withdrawn.
    pub async fn retract_stage(
        &self,
        case_id: &str,
        stage: Stage,
        reason: &str,
        officer_id: &str,
    ) -> Result<Transition, WorkflowError> {
        check_ids(case_id, officer_id)?;
        if reason.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest("reason is required".to_string()));
        }

        let _guard = self.locks.lock(case_id).await;
        self.ensure_writable(case_id).await?;
        let record = self.require(case_id, stage, "retract stage").await?;

        if let Some(next) = stage.successor() {
            if self.active(case_id, next).await?.is_some() {
                return Err(WorkflowError::InvalidStageState {
                    case_id: case_id.to_string(),
                    stage,
                    reason: format!("{} is still active and must be retracted first", next),
                });
            }
        }
        if record.status == StageStatus::Success {
            return Err(WorkflowError::InvalidStageState {
                case_id: case_id.to_string(),
                stage,
                reason: "a released payment cannot be retracted".to_string(),
            });
        }

        let prior = match stage.requires() {
            Some(prior) => self.active(case_id, prior).await?,
            None => None,
        };

        let draft = BlockDraft::new(case_id, EventType::StageRetracted, officer_id, &record.project_id)
            .with_meta("record_id", record.record_id.as_str())
            .with_meta("stage", stage.as_str())
            .with_meta("previous_status", json!(record.status))
            .with_meta("reason", reason)
            .with_remarks(format!("{} retracted: {}", stage, reason));

        let block = self.build(draft, self.clock(case_id).await?).await?;
        let retracted = advance(&record, StageStatus::Retracted, &block, Some(reason.to_string()));

        let mut writes = vec![StageWrite::Update {
            before: record.clone(),
            after: retracted.clone(),
        }];
        if let Some(prior) = prior {
            let restored = record
                .origin_block_id()
                .and_then(|origin| status_before(&prior, origin));
            if let Some(status) = restored {
                let reverted = advance(
                    &prior,
                    status,
                    &block,
                    Some(format!("{} retracted", stage)),
                );
                writes.push(StageWrite::Update {
                    before: prior,
                    after: reverted,
                });
            }
        }

        let block = self.commit(block, writes).await?;
        Ok(Transition {
            record: retracted,
            block,
        })
    }

    // === Integrity ===

    /// Verify a case chain. A failing chain flags the case.
    pub async fn verify_case(&self, case_id: &str) -> Result<VerificationReport, WorkflowError> {
        self.verify(case_id).await
    }

    pub fn flagged_cases(&self) -> Vec<CaseFlag> {
        self.flags.list()
    }

    /// Lift the flag of a case whose chain verifies again.
    pub async fn clear_flag(
        &self,
        case_id: &str,
        officer_id: &str,
    ) -> Result<VerificationReport, WorkflowError> {
        check_ids(case_id, officer_id)?;
        let _guard = self.locks.lock(case_id).await;

        let report = self.verify(case_id).await?;
        if !report.valid {
            return Err(WorkflowError::HashChainBroken {
                case_id: case_id.to_string(),
                block_id: report.broken_block_id().map(str::to_string),
            });
        }

        if self.flags.clear(case_id).is_some() {
            tracing::info!(case_id = %case_id, officer_id = %officer_id, "Case flag cleared");
        }
        Ok(report)
    }

    // === Internals ===

    /// Run a store call under the configured timeout.
    pub(crate) async fn timed<T, E, F>(&self, op: &'static str, fut: F) -> Result<T, WorkflowError>
    where
        F: Future<Output = Result<T, E>>,
        WorkflowError: From<E>,
    {
        match tokio::time::timeout(self.config.store_timeout(), fut).await {
            Ok(result) => result.map_err(WorkflowError::from),
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.config.store_timeout_ms, "Store call timed out");
                Err(WorkflowError::StoreUnavailable(format!(
                    "{} timed out after {}ms",
                    op, self.config.store_timeout_ms
                )))
            }
        }
    }

    /// Verify a chain and flag the case if it is broken.
    pub(crate) async fn verify(&self, case_id: &str) -> Result<VerificationReport, WorkflowError> {
        let report = self.timed("verify chain", self.verifier.verify(case_id)).await?;
        if !report.valid {
            self.flags
                .raise(case_id, report.broken_block_id().map(str::to_string));
        }
        Ok(report)
    }

    async fn ensure_writable(&self, case_id: &str) -> Result<(), WorkflowError> {
        if let Some(flag) = self.flags.get(case_id) {
            return Err(WorkflowError::HashChainBroken {
                case_id: case_id.to_string(),
                block_id: flag.block_id,
            });
        }

        if self.needs_reconcile.contains(case_id) {
            self.reconcile_locked(case_id).await?;
        }

        if self.config.verify_before_write {
            let report = self.verify(case_id).await?;
            if !report.valid {
                return Err(WorkflowError::HashChainBroken {
                    case_id: case_id.to_string(),
                    block_id: report.broken_block_id().map(str::to_string),
                });
            }
        }
        Ok(())
    }

    async fn active(&self, case_id: &str, stage: Stage) -> Result<Option<StageRecord>, WorkflowError> {
        self.timed("read stage", self.stages.active(case_id, stage))
            .await
    }

    async fn require(
        &self,
        case_id: &str,
        stage: Stage,
        attempted: &str,
    ) -> Result<StageRecord, WorkflowError> {
        self.active(case_id, stage)
            .await?
            .ok_or_else(|| WorkflowError::PrecedingStageMissing {
                case_id: case_id.to_string(),
                attempted: attempted.to_string(),
                requires: stage,
            })
    }

    async fn ensure_absent(&self, case_id: &str, stage: Stage) -> Result<(), WorkflowError> {
        match self.active(case_id, stage).await? {
            Some(_) => Err(WorkflowError::DuplicateStage {
                case_id: case_id.to_string(),
                stage,
            }),
            None => Ok(()),
        }
    }

    async fn pending_payment(&self, case_id: &str, attempted: &str) -> Result<StageRecord, WorkflowError> {
        let payment = self.require(case_id, Stage::Payment, attempted).await?;
        if payment.status != StageStatus::Pending {
            return Err(WorkflowError::InvalidStageState {
                case_id: case_id.to_string(),
                stage: Stage::Payment,
                reason: format!("payment is {:?}, expected Pending", payment.status),
            });
        }
        Ok(payment)
    }

    /// Current time as the next block of the case will record it.
    async fn clock(&self, case_id: &str) -> Result<DateTime<Utc>, WorkflowError> {
        let latest = self
            .timed("read chain tip", self.ledger.latest_block_for(case_id))
            .await?;
        Ok(BlockBuilder::stamp(latest.as_ref(), Utc::now()))
    }

    async fn build(&self, draft: BlockDraft, now: DateTime<Utc>) -> Result<LedgerBlock, WorkflowError> {
        self.timed("build block", self.builder.build_at(draft, now))
            .await
    }

    /// Apply stage writes, then append the block; revert the writes if the
    /// append is rejected.
    async fn commit(
        &self,
        block: LedgerBlock,
        writes: Vec<StageWrite>,
    ) -> Result<LedgerBlock, WorkflowError> {
        let case_id = block.case_id.clone();
        let event_type = block.event_type;

        if !writes.is_empty() {
            if let Err(err) = self.timed("apply stage writes", self.stages.apply(&writes)).await {
                // The store may have committed the writes before going quiet
                if matches!(err, WorkflowError::StoreUnavailable(_)) {
                    tracing::warn!(case_id = %case_id, error = %err, "Stage writes unconfirmed, case needs reconciliation");
                    self.needs_reconcile.insert(case_id);
                }
                return Err(err);
            }
        }

        let err = match self.timed("append block", self.ledger.append(block)).await {
            Ok(block) => {
                tracing::info!(
                    case_id = %case_id,
                    event_type = ?event_type,
                    block_id = %block.block_id,
                    height = block.height,
                    "Recorded transition"
                );
                return Ok(block);
            }
            Err(err) => err,
        };

        // An unavailable store may still have taken the block. The writes stay
        // and reconciliation keeps or drops them once the chain is readable.
        if matches!(err, WorkflowError::StoreUnavailable(_)) {
            tracing::warn!(case_id = %case_id, error = %err, "Append unconfirmed, case needs reconciliation");
            self.needs_reconcile.insert(case_id);
            return Err(err);
        }

        if !writes.is_empty() {
            match self.timed("revert stage writes", self.stages.revert(&writes)).await {
                Ok(()) => {
                    tracing::warn!(case_id = %case_id, error = %err, "Rolled back stage writes after failed append");
                }
                Err(revert_err) => {
                    tracing::error!(
                        case_id = %case_id,
                        error = %err,
                        revert_error = %revert_err,
                        "Rollback failed, case needs reconciliation"
                    );
                    self.needs_reconcile.insert(case_id);
                }
            }
        }
        Err(err)
    }
}

fn check_ids(case_id: &str, officer_id: &str) -> Result<(), WorkflowError> {
    if case_id.trim().is_empty() {
        return Err(WorkflowError::InvalidRequest("case_id is required".to_string()));
    }
    if officer_id.trim().is_empty() {
        return Err(WorkflowError::InvalidRequest("officer_id is required".to_string()));
    }
    Ok(())
}

fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn with_optional(draft: BlockDraft, key: &str, value: &Option<String>) -> BlockDraft {
    match value {
        Some(value) => draft.with_meta(key, value.as_str()),
        None => draft,
    }
}

/// New record whose history starts at its minting block.
fn new_record(
    record_id: String,
    block: &LedgerBlock,
    stage: Stage,
    status: StageStatus,
    details: StageDetails,
) -> StageRecord {
    let origin = StatusChange::new(status, &block.officer_id, &block.block_id, block.occurred_at);
    StageRecord::new(record_id, &block.case_id, &block.project_id, stage, details, origin)
}

fn advance(
    record: &StageRecord,
    status: StageStatus,
    block: &LedgerBlock,
    reason: Option<String>,
) -> StageRecord {
    record.with_status(status, &block.officer_id, &block.block_id, block.occurred_at, reason)
}

/// Status a record had just before `block_id` changed it.
fn status_before(record: &StageRecord, block_id: &str) -> Option<StageStatus> {
    let pos = record.history.iter().position(|c| c.block_id == block_id)?;
    pos.checked_sub(1).map(|i| record.history[i].status)
}

/// SHA-256 over the canonical listing of attachment references.
pub fn document_fingerprint(attachments: &[AttachmentRef]) -> String {
    let listing = json!(attachments);
    compute_hash(canonical_json(&listing).as_bytes())
}
