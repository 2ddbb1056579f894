//! Stage workflow for land-acquisition cases.
//!
//! A case moves through measurement, award, notice, document collection and
//! payment. The [`WorkflowEngine`] enforces that order, serializes writers
//! per case, and records every transition as a block in the case's ledger
//! chain, so the audit trail and the stage records never disagree.
//!
//! # Key Components
//!
//! - [`WorkflowEngine`]: Validates and records transitions
//! - [`StageStore`]: Trait for versioned stage record storage
//! - [`CaseLocks`]: Per-case async mutexes
//! - [`CaseFlags`]: Cases whose chain failed verification
//!
//! # Example
//!
//! ```ignore
//! use acquisition_workflow::{AwardPayload, InMemoryStageStore, MeasurementPayload, WorkflowEngine};
//! use land_ledger::InMemoryLedgerStore;
//!
//! let engine = WorkflowEngine::new(
//!     Arc::new(InMemoryLedgerStore::new()),
//!     Arc::new(InMemoryStageStore::new()),
//! );
//!
//! engine
//!     .record_measurement("SY-100", MeasurementPayload::new("project-1", 5.5), "officer-7")
//!     .await?;
//! engine
//!     .declare_award("SY-100", AwardPayload::new(500_000.0, 100_000.0), "officer-7")
//!     .await?;
//!
//! let status = engine.get_case_status("SY-100").await?;
//! assert!(status.verification.valid);
//! ```

pub mod bulk;
pub mod config;
pub mod engine;
pub mod error;
pub mod flags;
pub mod locks;
pub mod reconcile;
pub mod stage;
pub mod stage_store;
pub mod view;

// Re-export main types
pub use bulk::{BulkBatch, BulkItemResult, BulkOutcome, BulkRequest, CaseInput};
pub use config::EngineConfig;
pub use engine::{document_fingerprint, Transition, WorkflowEngine};
pub use error::WorkflowError;
pub use flags::{CaseFlag, CaseFlags};
pub use locks::CaseLocks;
pub use reconcile::{DiscardedVersion, ReconcileReport};
pub use stage::*;
pub use stage_store::{InMemoryStageStore, StageStore, StageStoreError, StageWrite};
pub use view::{CaseStatus, ProjectProgress};
