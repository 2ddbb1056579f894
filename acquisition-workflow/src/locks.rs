//! Per-case write serialization.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per case id.
///
/// Writers of the same case queue on its mutex; different cases never
/// share one.
#[derive(Default)]
pub struct CaseLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a case.
    pub async fn lock(&self, case_id: &str) -> OwnedMutexGuard<()> {
        // Clone out of the map so no shard guard is held across the await
        let mutex = self
            .locks
            .entry(case_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Number of cases that have been locked at least once.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_case_is_exclusive() {
        let locks = Arc::new(CaseLocks::new());
        let guard = locks.lock("SY-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("SY-1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_cases_do_not_share_locks() {
        let locks = CaseLocks::new();
        let _a = locks.lock("SY-1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("SY-2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
