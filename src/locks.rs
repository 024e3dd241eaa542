//! Per-alarm serialization of mutating operations.
//!
//! Control-surface edits, trigger handling and reconciliation all take the
//! lock for the alarm id they touch, so a deletion and a sync pull of the
//! same id can never interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct AlarmLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AlarmLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, alarm_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only the map still references are idle.
            locks.retain(|id, lock| id == alarm_id || Arc::strong_count(lock) > 1);
            locks
                .entry(alarm_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_is_serialized() {
        let locks = Arc::new(AlarmLocks::new());
        let guard = locks.lock("alarm-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("alarm-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_ids_do_not_block_and_idle_entries_are_pruned() {
        let locks = AlarmLocks::new();
        let _a = locks.lock("alarm-a").await;
        {
            let _b = locks.lock("alarm-b").await;
        }
        let _c = locks.lock("alarm-c").await;
        assert_eq!(locks.tracked(), 2);
    }
}
