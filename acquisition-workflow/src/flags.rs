//! Cases flagged for broken hash chains.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Why and when a case was flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFlag {
    pub case_id: String,
    /// First block that failed verification
    pub block_id: Option<String>,
    pub flagged_at: DateTime<Utc>,
}

/// Registry of flagged cases. A flagged case refuses every write.
#[derive(Default)]
pub struct CaseFlags {
    flags: DashMap<String, CaseFlag>,
}

impl CaseFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a case. An existing flag keeps its original timestamp.
    pub fn raise(&self, case_id: &str, block_id: Option<String>) -> CaseFlag {
        self.flags
            .entry(case_id.to_string())
            .or_insert_with(|| {
                tracing::warn!(case_id = %case_id, block_id = ?block_id, "Case flagged for broken hash chain");
                CaseFlag {
                    case_id: case_id.to_string(),
                    block_id,
                    flagged_at: Utc::now(),
                }
            })
            .clone()
    }

    pub fn get(&self, case_id: &str) -> Option<CaseFlag> {
        self.flags.get(case_id).map(|f| f.clone())
    }

    pub fn is_flagged(&self, case_id: &str) -> bool {
        self.flags.contains_key(case_id)
    }

    pub fn clear(&self, case_id: &str) -> Option<CaseFlag> {
        self.flags.remove(case_id).map(|(_, flag)| flag)
    }

    /// All flags ordered by case id.
    pub fn list(&self) -> Vec<CaseFlag> {
        let mut flags: Vec<CaseFlag> = self.flags.iter().map(|f| f.value().clone()).collect();
        flags.sort_by(|a, b| a.case_id.cmp(&b.case_id));
        flags
    }
}
