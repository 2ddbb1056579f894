//! Shared fixtures for workflow integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acquisition_workflow::{
    AttachmentRef, AwardPayload, EngineConfig, InMemoryStageStore, MeasurementPayload,
    NoticePayload, PaymentPayload, Stage, StageRecord, StageStore, StageStoreError, StageWrite,
    WorkflowEngine,
};
use land_ledger::{BlockSequence, InMemoryLedgerStore, LedgerBlock, LedgerStore, StoreError};

pub const OFFICER: &str = "officer-7";
pub const PROJECT: &str = "project-ring-road";

pub struct Harness {
    pub ledger: Arc<InMemoryLedgerStore>,
    pub stages: Arc<InMemoryStageStore>,
    pub engine: Arc<WorkflowEngine>,
}

pub fn harness() -> Harness {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let stages = Arc::new(InMemoryStageStore::new());
    let engine = Arc::new(WorkflowEngine::new(ledger.clone(), stages.clone()));
    Harness {
        ledger,
        stages,
        engine,
    }
}

pub fn measurement(area: f64) -> MeasurementPayload {
    MeasurementPayload {
        village: Some("Wagholi".to_string()),
        district: Some("Pune".to_string()),
        ..MeasurementPayload::new(PROJECT, area)
    }
}

pub fn award() -> AwardPayload {
    AwardPayload::new(500_000.0, 100_000.0)
}

pub fn attachment(uri: &str) -> AttachmentRef {
    AttachmentRef {
        uri: uri.to_string(),
        content_hash: None,
        file_name: Some("7-12-extract.pdf".to_string()),
    }
}

/// Drive a case up to a pending payment.
pub async fn to_pending_payment(engine: &WorkflowEngine, case_id: &str) {
    engine.record_measurement(case_id, measurement(5.5), OFFICER).await.unwrap();
    engine.declare_award(case_id, award(), OFFICER).await.unwrap();
    engine
        .generate_notice(case_id, NoticePayload::default(), OFFICER)
        .await
        .unwrap();
    engine
        .upload_documents(case_id, vec![attachment("s3://docs/notice.pdf")], OFFICER)
        .await
        .unwrap();
    engine
        .create_payment_slip(case_id, PaymentPayload::default(), OFFICER)
        .await
        .unwrap();
}

pub async fn active(stages: &InMemoryStageStore, case_id: &str, stage: Stage) -> Option<StageRecord> {
    stages.active(case_id, stage).await.unwrap()
}

// =============================================================================
// Fault-injecting stores
// =============================================================================

async fn sleep_ms(delay: &AtomicU64) {
    let delay = delay.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

/// Ledger store that can refuse appends or stall reads and appends.
pub struct FlakyLedger {
    pub inner: Arc<InMemoryLedgerStore>,
    pub fail_appends: AtomicBool,
    /// Milliseconds every read sleeps before answering
    pub read_delay_ms: AtomicU64,
    /// Milliseconds an append sleeps before reaching the store
    pub append_delay_ms: AtomicU64,
    /// Milliseconds an append sleeps after the store took the block
    pub ack_delay_ms: AtomicU64,
}

impl FlakyLedger {
    pub fn new(inner: Arc<InMemoryLedgerStore>) -> Self {
        Self {
            inner,
            fail_appends: AtomicBool::new(false),
            read_delay_ms: AtomicU64::new(0),
            append_delay_ms: AtomicU64::new(0),
            ack_delay_ms: AtomicU64::new(0),
        }
    }

    async fn stall(&self) {
        sleep_ms(&self.read_delay_ms).await;
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn append(&self, block: LedgerBlock) -> Result<LedgerBlock, StoreError> {
        sleep_ms(&self.append_delay_ms).await;
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::ConcurrentWriteConflict {
                case_id: block.case_id,
            });
        }
        let stored = self.inner.append(block).await?;
        sleep_ms(&self.ack_delay_ms).await;
        Ok(stored)
    }

    async fn latest_block_for(&self, case_id: &str) -> Result<Option<LedgerBlock>, StoreError> {
        self.stall().await;
        self.inner.latest_block_for(case_id).await
    }

    async fn blocks_for(&self, case_id: &str) -> Result<BlockSequence, StoreError> {
        self.stall().await;
        self.inner.blocks_for(case_id).await
    }

    async fn blocks_for_project(&self, project_id: &str) -> Result<Vec<LedgerBlock>, StoreError> {
        self.stall().await;
        self.inner.blocks_for_project(project_id).await
    }

    async fn case_ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.case_ids().await
    }
}

/// Stage store whose rollback can fail and whose writes can stall.
pub struct FlakyStages {
    pub inner: Arc<InMemoryStageStore>,
    pub fail_reverts: AtomicBool,
    /// Milliseconds `apply` sleeps after the writes are stored
    pub ack_delay_ms: AtomicU64,
}

impl FlakyStages {
    pub fn new(inner: Arc<InMemoryStageStore>) -> Self {
        Self {
            inner,
            fail_reverts: AtomicBool::new(false),
            ack_delay_ms: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl StageStore for FlakyStages {
    async fn apply(&self, writes: &[StageWrite]) -> Result<(), StageStoreError> {
        self.inner.apply(writes).await?;
        sleep_ms(&self.ack_delay_ms).await;
        Ok(())
    }

    async fn revert(&self, writes: &[StageWrite]) -> Result<(), StageStoreError> {
        if self.fail_reverts.load(Ordering::SeqCst) {
            return Err(StageStoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.revert(writes).await
    }

    async fn active(&self, case_id: &str, stage: Stage) -> Result<Option<StageRecord>, StageStoreError> {
        self.inner.active(case_id, stage).await
    }

    async fn records_for(&self, case_id: &str) -> Result<Vec<StageRecord>, StageStoreError> {
        self.inner.records_for(case_id).await
    }

    async fn versions(&self, case_id: &str, record_id: &str) -> Result<Vec<StageRecord>, StageStoreError> {
        self.inner.versions(case_id, record_id).await
    }

    async fn discard_latest(
        &self,
        case_id: &str,
        record_id: &str,
    ) -> Result<Option<StageRecord>, StageStoreError> {
        self.inner.discard_latest(case_id, record_id).await
    }

    async fn case_ids_for_project(&self, project_id: &str) -> Result<Vec<String>, StageStoreError> {
        self.inner.case_ids_for_project(project_id).await
    }
}

pub struct FlakyHarness {
    pub ledger: Arc<InMemoryLedgerStore>,
    pub stages: Arc<InMemoryStageStore>,
    pub flaky_ledger: Arc<FlakyLedger>,
    pub flaky_stages: Arc<FlakyStages>,
    pub engine: WorkflowEngine,
}

pub fn flaky_harness(config: EngineConfig) -> FlakyHarness {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let stages = Arc::new(InMemoryStageStore::new());
    let flaky_ledger = Arc::new(FlakyLedger::new(ledger.clone()));
    let flaky_stages = Arc::new(FlakyStages::new(stages.clone()));
    let engine = WorkflowEngine::with_config(flaky_ledger.clone(), flaky_stages.clone(), config);
    FlakyHarness {
        ledger,
        stages,
        flaky_ledger,
        flaky_stages,
        engine,
    }
}
