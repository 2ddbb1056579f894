//! Persistence for case stage records.
//!
//! Records are versioned: every status change stores a new version and the
//! store exposes the latest one. Older versions are kept so that status
//! history is never overwritten in place, and so that a compensating
//! rollback can drop exactly the version it wrote.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::stage::{Stage, StageRecord};

/// Error types for stage store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageStoreError {
    /// Backing storage could not be reached
    #[error("Stage store unavailable: {0}")]
    Unavailable(String),

    /// An active record for (case, stage) already exists
    #[error("Case {case_id} already has an active {stage} record")]
    DuplicateStage { case_id: String, stage: Stage },

    /// The stored version is not the one the write was based on
    #[error("Stage record {record_id} of case {case_id} changed underneath the write")]
    Conflict { case_id: String, record_id: String },
}

/// One change inside an atomic stage write.
#[derive(Debug, Clone, PartialEq)]
pub enum StageWrite {
    /// Create a new record
    Insert(StageRecord),
    /// Store `after` as the next version of a record currently at `before`
    Update {
        before: StageRecord,
        after: StageRecord,
    },
}

impl StageWrite {
    pub fn case_id(&self) -> &str {
        match self {
            Self::Insert(record) => &record.case_id,
            Self::Update { after, .. } => &after.case_id,
        }
    }

    /// The record as it stands once the write is applied.
    pub fn record(&self) -> &StageRecord {
        match self {
            Self::Insert(record) => record,
            Self::Update { after, .. } => after,
        }
    }
}

/// Trait for stage record storage.
#[async_trait]
pub trait StageStore: Send + Sync {
    /// Apply every write or none of them.
    async fn apply(&self, writes: &[StageWrite]) -> Result<(), StageStoreError>;

    /// Undo writes previously applied, in reverse order.
    async fn revert(&self, writes: &[StageWrite]) -> Result<(), StageStoreError>;

    /// Active record of a stage, if any.
    async fn active(&self, case_id: &str, stage: Stage) -> Result<Option<StageRecord>, StageStoreError>;

    /// Latest version of every record of a case, retracted ones included,
    /// in creation order.
    async fn records_for(&self, case_id: &str) -> Result<Vec<StageRecord>, StageStoreError>;

    /// Every stored version of a record, oldest first.
    async fn versions(&self, case_id: &str, record_id: &str) -> Result<Vec<StageRecord>, StageStoreError>;

    /// Drop the latest version of a record. Dropping its only version
    /// removes the record.
    async fn discard_latest(
        &self,
        case_id: &str,
        record_id: &str,
    ) -> Result<Option<StageRecord>, StageStoreError>;

    /// Cases with at least one record in a project.
    async fn case_ids_for_project(&self, project_id: &str) -> Result<Vec<String>, StageStoreError>;
}

/// In-memory stage store.
pub struct InMemoryStageStore {
    /// Per case, the version list of each record in creation order
    records: Arc<RwLock<HashMap<String, Vec<Vec<StageRecord>>>>>,
    /// Index by project
    by_project: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
}

impl InMemoryStageStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            by_project: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Total number of records across all cases.
    pub async fn count(&self) -> usize {
        let records = self.records.read().await;
        records.values().map(Vec::len).sum()
    }
}

impl Default for InMemoryStageStore {
    fn default() -> Self {
        Self::new()
    }
}

fn latest_matches(stored: &StageRecord, expected: &StageRecord) -> bool {
    stored.history.len() == expected.history.len() && stored.status == expected.status
}

fn check(cases: &HashMap<String, Vec<Vec<StageRecord>>>, write: &StageWrite) -> Result<(), StageStoreError> {
    let chain = cases.get(write.case_id());

    match write {
        StageWrite::Insert(record) => {
            let duplicate = chain
                .into_iter()
                .flatten()
                .filter_map(|versions| versions.last())
                .any(|r| r.stage == record.stage && r.is_active());
            if duplicate {
                return Err(StageStoreError::DuplicateStage {
                    case_id: record.case_id.clone(),
                    stage: record.stage,
                });
            }
        }
        StageWrite::Update { before, .. } => {
            let current = chain
                .into_iter()
                .flatten()
                .find(|versions| versions.first().map(|r| &r.record_id) == Some(&before.record_id))
                .and_then(|versions| versions.last());

            if !current.map(|r| latest_matches(r, before)).unwrap_or(false) {
                return Err(StageStoreError::Conflict {
                    case_id: before.case_id.clone(),
                    record_id: before.record_id.clone(),
                });
            }
        }
    }
    Ok(())
}

#[async_trait]
impl StageStore for InMemoryStageStore {
    async fn apply(&self, writes: &[StageWrite]) -> Result<(), StageStoreError> {
        {
            let mut cases = self.records.write().await;

            for write in writes {
                check(&cases, write)?;
            }

            for write in writes {
                let chain = cases.entry(write.case_id().to_string()).or_default();
                match write {
                    StageWrite::Insert(record) => chain.push(vec![record.clone()]),
                    StageWrite::Update { after, .. } => {
                        if let Some(versions) = chain
                            .iter_mut()
                            .find(|v| v.first().map(|r| &r.record_id) == Some(&after.record_id))
                        {
                            versions.push(after.clone());
                        }
                    }
                }
            }
        }

        let mut by_project = self.by_project.write().await;
        for write in writes {
            let record = write.record();
            by_project
                .entry(record.project_id.clone())
                .or_default()
                .insert(record.case_id.clone());
        }

        tracing::debug!(writes = writes.len(), "Applied stage writes");
        Ok(())
    }

    async fn revert(&self, writes: &[StageWrite]) -> Result<(), StageStoreError> {
        let mut cases = self.records.write().await;

        for write in writes.iter().rev() {
            let record = write.record();
            let conflict = || StageStoreError::Conflict {
                case_id: record.case_id.clone(),
                record_id: record.record_id.clone(),
            };

            let chain = cases.get_mut(&record.case_id).ok_or_else(conflict)?;
            let pos = chain
                .iter()
                .position(|v| v.first().map(|r| &r.record_id) == Some(&record.record_id))
                .ok_or_else(conflict)?;

            let latest = chain[pos].last().ok_or_else(conflict)?;
            if !latest_matches(latest, record) {
                return Err(conflict());
            }

            match write {
                StageWrite::Insert(_) => {
                    chain.remove(pos);
                }
                StageWrite::Update { .. } => {
                    chain[pos].pop();
                }
            }
        }

        tracing::debug!(writes = writes.len(), "Reverted stage writes");
        Ok(())
    }

    async fn active(&self, case_id: &str, stage: Stage) -> Result<Option<StageRecord>, StageStoreError> {
        let cases = self.records.read().await;
        Ok(cases
            .get(case_id)
            .into_iter()
            .flatten()
            .filter_map(|versions| versions.last())
            .find(|r| r.stage == stage && r.is_active())
            .cloned())
    }

    async fn records_for(&self, case_id: &str) -> Result<Vec<StageRecord>, StageStoreError> {
        let cases = self.records.read().await;
        Ok(cases
            .get(case_id)
            .into_iter()
            .flatten()
            .filter_map(|versions| versions.last().cloned())
            .collect())
    }

    async fn versions(&self, case_id: &str, record_id: &str) -> Result<Vec<StageRecord>, StageStoreError> {
        let cases = self.records.read().await;
        Ok(cases
            .get(case_id)
            .into_iter()
            .flatten()
            .find(|v| v.first().map(|r| r.record_id.as_str()) == Some(record_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn discard_latest(
        &self,
        case_id: &str,
        record_id: &str,
    ) -> Result<Option<StageRecord>, StageStoreError> {
        let mut cases = self.records.write().await;
        let Some(chain) = cases.get_mut(case_id) else {
            return Ok(None);
        };
        let Some(pos) = chain
            .iter()
            .position(|v| v.first().map(|r| r.record_id.as_str()) == Some(record_id))
        else {
            return Ok(None);
        };

        let dropped = chain[pos].pop();
        if chain[pos].is_empty() {
            chain.remove(pos);
        }

        tracing::warn!(case_id = %case_id, record_id = %record_id, "Discarded stage record version");
        Ok(dropped)
    }

    async fn case_ids_for_project(&self, project_id: &str) -> Result<Vec<String>, StageStoreError> {
        let by_project = self.by_project.read().await;
        Ok(by_project
            .get(project_id)
            .map(|cases| cases.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{MeasurementDetails, StageDetails, StageStatus, StatusChange};
    use chrono::Utc;
    use tokio_test::{assert_err, assert_ok};

    fn measurement(case_id: &str) -> StageRecord {
        StageRecord::new(
            uuid::Uuid::new_v4().to_string(),
            case_id,
            "project-1",
            Stage::Measurement,
            StageDetails::Measurement(MeasurementDetails {
                measured_area: 5.5,
                unit: "hectare".to_string(),
                village: None,
                taluka: None,
                district: None,
                land_type: None,
                landowner_name: None,
                notes: None,
            }),
            StatusChange::new(StageStatus::Recorded, "officer-1", "block-0", Utc::now()),
        )
    }

    #[tokio::test]
    async fn test_insert_and_duplicate() {
        let store = InMemoryStageStore::new();
        let record = measurement("SY-1");

        assert_ok!(store.apply(&[StageWrite::Insert(record.clone())]).await);
        let err = assert_err!(store.apply(&[StageWrite::Insert(measurement("SY-1"))]).await);
        assert!(matches!(err, StageStoreError::DuplicateStage { stage: Stage::Measurement, .. }));

        let active = store.active("SY-1", Stage::Measurement).await.unwrap().unwrap();
        assert_eq!(active.record_id, record.record_id);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_update_keeps_versions() {
        let store = InMemoryStageStore::new();
        let record = measurement("SY-1");
        store.apply(&[StageWrite::Insert(record.clone())]).await.unwrap();

        let after = record.with_status(StageStatus::AwardGenerated, "officer-1", "block-1", Utc::now(), None);
        store
            .apply(&[StageWrite::Update { before: record.clone(), after: after.clone() }])
            .await
            .unwrap();

        let versions = store.versions("SY-1", &record.record_id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].status, StageStatus::Recorded);
        assert_eq!(store.records_for("SY-1").await.unwrap()[0].status, StageStatus::AwardGenerated);

        // A second writer based on the stale version loses
        let stale = record.with_status(StageStatus::Retracted, "officer-2", "block-x", Utc::now(), None);
        let err = assert_err!(store.apply(&[StageWrite::Update { before: record, after: stale }]).await);
        assert!(matches!(err, StageStoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let store = InMemoryStageStore::new();
        let existing = measurement("SY-1");
        store.apply(&[StageWrite::Insert(existing)]).await.unwrap();

        let fresh = measurement("SY-2");
        let dup = measurement("SY-1");
        assert_err!(store.apply(&[StageWrite::Insert(fresh), StageWrite::Insert(dup)]).await);

        assert!(store.records_for("SY-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revert_undoes_insert_and_update() {
        let store = InMemoryStageStore::new();
        let base = measurement("SY-1");
        store.apply(&[StageWrite::Insert(base.clone())]).await.unwrap();

        let writes = vec![
            StageWrite::Update {
                before: base.clone(),
                after: base.with_status(StageStatus::AwardGenerated, "o", "block-1", Utc::now(), None),
            },
            StageWrite::Insert(measurement("SY-2")),
        ];
        store.apply(&writes).await.unwrap();
        assert_ok!(store.revert(&writes).await);

        assert!(store.records_for("SY-2").await.unwrap().is_empty());
        let restored = store.active("SY-1", Stage::Measurement).await.unwrap().unwrap();
        assert_eq!(restored, base);
    }

    #[tokio::test]
    async fn test_discard_latest_and_project_index() {
        let store = InMemoryStageStore::new();
        let record = measurement("SY-1");
        store.apply(&[StageWrite::Insert(record.clone())]).await.unwrap();

        assert_eq!(store.case_ids_for_project("project-1").await.unwrap(), vec!["SY-1"]);

        let dropped = store.discard_latest("SY-1", &record.record_id).await.unwrap();
        assert_eq!(dropped, Some(record));
        assert!(store.records_for("SY-1").await.unwrap().is_empty());
        assert_eq!(store.discard_latest("SY-1", "missing").await.unwrap(), None);
    }
}
