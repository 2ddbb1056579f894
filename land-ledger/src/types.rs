//! Core types for the case ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `previous_hash` of the first block in every case chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Version tag of the canonical field layout fed to the block hash.
pub const HASH_VERSION: &str = "v1";

/// Opaque key/value payload describing an event.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Kind of state transition a block records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    MeasurementRecorded,
    AwardDeclared,
    NoticeGenerated,
    DocumentsUploaded,
    PaymentSlipCreated,
    PaymentReleased,
    PaymentFailed,
    /// A stage record was withdrawn so it can be recorded again.
    StageRetracted,
    /// Ad hoc annotation on an existing stage; changes no status.
    StatusUpdated,
}

impl EventType {
    /// Stable name used in block ids and in the hash input.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MeasurementRecorded => "MeasurementRecorded",
            Self::AwardDeclared => "AwardDeclared",
            Self::NoticeGenerated => "NoticeGenerated",
            Self::DocumentsUploaded => "DocumentsUploaded",
            Self::PaymentSlipCreated => "PaymentSlipCreated",
            Self::PaymentReleased => "PaymentReleased",
            Self::PaymentFailed => "PaymentFailed",
            Self::StageRetracted => "StageRetracted",
            Self::StatusUpdated => "StatusUpdated",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable, hash-linked audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBlock {
    /// `<case_id>:<event_type>:<occurred_at micros>:<nonce prefix>`
    pub block_id: String,
    /// Survey number of the case
    pub case_id: String,
    /// Position in the case chain, 0 for the first block
    pub height: u64,
    pub event_type: EventType,
    pub officer_id: String,
    pub project_id: String,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub remarks: String,
    /// `current_hash` of the preceding block of the same case
    pub previous_hash: String,
    /// Random value mixed into the hash to defeat prediction
    pub nonce: String,
    pub hash_version: String,
    pub current_hash: String,
    /// Verification outcome. Never set by the writer.
    #[serde(default)]
    pub is_valid: Option<bool>,
}

impl LedgerBlock {
    /// Whether this is the first block of its case chain.
    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.previous_hash == GENESIS_HASH
    }
}

/// Event description handed to the [`crate::BlockBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDraft {
    pub case_id: String,
    pub event_type: EventType,
    pub officer_id: String,
    pub project_id: String,
    pub metadata: Metadata,
    pub remarks: String,
}

impl BlockDraft {
    /// Create a draft with empty metadata and remarks.
    pub fn new(
        case_id: impl Into<String>,
        event_type: EventType,
        officer_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            event_type,
            officer_id: officer_id.into(),
            project_id: project_id.into(),
            metadata: Metadata::new(),
            remarks: String::new(),
        }
    }

    /// Add a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set free-text remarks.
    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = remarks.into();
        self
    }
}
