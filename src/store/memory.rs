//! In-memory stores.
//!
//! `MemoryAlarmStore` mirrors the SQLite store semantics (including the
//! one-active-execution constraint and terminal immutability) without a
//! worker thread, which keeps paused-clock tests deterministic.
//! `MemoryRemoteMirror` stands in for the cloud mirror and can be told to
//! fail individual operations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AlarmStore, RemoteMirror};
use crate::error::{AlarmError, AlarmResult};
use crate::models::{AlarmDefinition, AlarmExecution, CompletionStats, ExecutionStatus, MotionSample};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct LocalState {
    alarms: BTreeMap<String, AlarmDefinition>,
    tombstones: BTreeMap<String, (String, DateTime<Utc>)>,
    executions: HashMap<String, AlarmExecution>,
    samples: HashMap<String, Vec<MotionSample>>,
}

#[derive(Default)]
pub struct MemoryAlarmStore {
    state: Mutex<LocalState>,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlarmStore for MemoryAlarmStore {
    async fn upsert_alarm(&self, alarm: &AlarmDefinition) -> AlarmResult<()> {
        lock(&self.state)
            .alarms
            .insert(alarm.id.clone(), alarm.clone());
        Ok(())
    }

    async fn get_alarm(&self, alarm_id: &str) -> AlarmResult<Option<AlarmDefinition>> {
        Ok(lock(&self.state).alarms.get(alarm_id).cloned())
    }

    async fn list_alarms(&self, user_id: &str) -> AlarmResult<Vec<AlarmDefinition>> {
        Ok(lock(&self.state)
            .alarms
            .values()
            .filter(|alarm| alarm.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_enabled_alarms(&self) -> AlarmResult<Vec<AlarmDefinition>> {
        Ok(lock(&self.state)
            .alarms
            .values()
            .filter(|alarm| alarm.enabled)
            .cloned()
            .collect())
    }

    async fn delete_alarm(&self, alarm_id: &str) -> AlarmResult<bool> {
        Ok(lock(&self.state).alarms.remove(alarm_id).is_some())
    }

    async fn record_tombstone(
        &self,
        alarm_id: &str,
        user_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> AlarmResult<()> {
        lock(&self.state)
            .tombstones
            .insert(alarm_id.to_string(), (user_id.to_string(), deleted_at));
        Ok(())
    }

    async fn list_tombstones(&self, user_id: &str) -> AlarmResult<Vec<String>> {
        Ok(lock(&self.state)
            .tombstones
            .iter()
            .filter(|(_, (owner, _))| owner == user_id)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn clear_tombstone(&self, alarm_id: &str) -> AlarmResult<()> {
        lock(&self.state).tombstones.remove(alarm_id);
        Ok(())
    }

    async fn save_execution(&self, execution: &AlarmExecution) -> AlarmResult<()> {
        let mut state = lock(&self.state);

        let existing_status = state.executions.get(&execution.id).map(|row| row.status);
        if let Some(status) = existing_status.filter(|status| status.is_terminal()) {
            if status == execution.status && execution.remote_synced {
                if let Some(row) = state.executions.get_mut(&execution.id) {
                    row.remote_synced = true;
                }
            }
            return Ok(());
        }

        if !execution.status.is_terminal() {
            let conflict = state.executions.values().any(|other| {
                other.alarm_id == execution.alarm_id
                    && other.id != execution.id
                    && !other.status.is_terminal()
            });
            if conflict {
                return Err(AlarmError::StorageFailure(anyhow!(
                    "alarm {} already has an active execution",
                    execution.alarm_id
                )));
            }
        }

        state
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> AlarmResult<Option<AlarmExecution>> {
        Ok(lock(&self.state).executions.get(execution_id).cloned())
    }

    async fn active_execution(&self, alarm_id: &str) -> AlarmResult<Option<AlarmExecution>> {
        Ok(lock(&self.state)
            .executions
            .values()
            .find(|execution| execution.alarm_id == alarm_id && !execution.status.is_terminal())
            .cloned())
    }

    async fn list_executions(&self, alarm_id: &str) -> AlarmResult<Vec<AlarmExecution>> {
        let mut executions: Vec<_> = lock(&self.state)
            .executions
            .values()
            .filter(|execution| execution.alarm_id == alarm_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.scheduled_time.cmp(&a.scheduled_time));
        Ok(executions)
    }

    async fn list_active_executions(&self) -> AlarmResult<Vec<AlarmExecution>> {
        Ok(lock(&self.state)
            .executions
            .values()
            .filter(|execution| !execution.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_unsynced_executions(&self) -> AlarmResult<Vec<AlarmExecution>> {
        Ok(lock(&self.state)
            .executions
            .values()
            .filter(|execution| execution.status.is_terminal() && !execution.remote_synced)
            .cloned()
            .collect())
    }

    async fn discard_execution(&self, execution_id: &str) -> AlarmResult<()> {
        let mut state = lock(&self.state);
        let discardable = state
            .executions
            .get(execution_id)
            .map(|execution| !execution.status.is_terminal())
            .unwrap_or(false);
        if discardable {
            state.executions.remove(execution_id);
            state.samples.remove(execution_id);
        }
        Ok(())
    }

    async fn completion_stats(&self, alarm_id: &str) -> AlarmResult<CompletionStats> {
        let state = lock(&self.state);
        let mut stats = CompletionStats::default();
        for execution in state.executions.values() {
            if execution.alarm_id != alarm_id {
                continue;
            }
            match execution.status {
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::Missed => stats.missed += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn insert_motion_samples(
        &self,
        execution_id: &str,
        samples: &[MotionSample],
    ) -> AlarmResult<()> {
        lock(&self.state)
            .samples
            .entry(execution_id.to_string())
            .or_default()
            .extend_from_slice(samples);
        Ok(())
    }

    async fn count_motion_samples(&self, execution_id: &str) -> AlarmResult<u64> {
        Ok(lock(&self.state)
            .samples
            .get(execution_id)
            .map(|samples| samples.len() as u64)
            .unwrap_or(0))
    }

    async fn list_motion_samples(&self, execution_id: &str) -> AlarmResult<Vec<MotionSample>> {
        Ok(lock(&self.state)
            .samples
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct MirrorState {
    alarms: BTreeMap<String, AlarmDefinition>,
    executions: HashMap<String, AlarmExecution>,
    offline: bool,
    failing_ids: HashSet<String>,
}

/// In-process stand-in for the cloud mirror, keyed by user id.
#[derive(Default)]
pub struct MemoryRemoteMirror {
    state: Mutex<MirrorState>,
}

impl MemoryRemoteMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `SyncFailure` while offline.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Writes touching `id` (alarm or execution) fail until cleared.
    pub fn fail_writes_for(&self, id: &str) {
        lock(&self.state).failing_ids.insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing_ids.clear();
    }

    pub fn alarm_ids(&self, user_id: &str) -> Vec<String> {
        lock(&self.state)
            .alarms
            .values()
            .filter(|alarm| alarm.user_id == user_id)
            .map(|alarm| alarm.id.clone())
            .collect()
    }

    pub fn execution(&self, execution_id: &str) -> Option<AlarmExecution> {
        lock(&self.state).executions.get(execution_id).cloned()
    }

    fn check_write(state: &MirrorState, id: &str) -> AlarmResult<()> {
        if state.offline {
            return Err(AlarmError::sync(id, "remote mirror offline"));
        }
        if state.failing_ids.contains(id) {
            return Err(AlarmError::sync(id, "remote rejected write"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteMirror for MemoryRemoteMirror {
    async fn fetch_alarms(&self, user_id: &str) -> AlarmResult<Vec<AlarmDefinition>> {
        let state = lock(&self.state);
        if state.offline {
            return Err(AlarmError::sync(user_id, "remote mirror offline"));
        }
        Ok(state
            .alarms
            .values()
            .filter(|alarm| alarm.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn upsert_alarm(&self, alarm: &AlarmDefinition) -> AlarmResult<()> {
        let mut state = lock(&self.state);
        Self::check_write(&state, &alarm.id)?;
        state.alarms.insert(alarm.id.clone(), alarm.clone());
        Ok(())
    }

    async fn delete_alarm(&self, _user_id: &str, alarm_id: &str) -> AlarmResult<()> {
        let mut state = lock(&self.state);
        Self::check_write(&state, alarm_id)?;
        state.alarms.remove(alarm_id);
        Ok(())
    }

    async fn push_execution(&self, execution: &AlarmExecution) -> AlarmResult<()> {
        let mut state = lock(&self.state);
        Self::check_write(&state, &execution.id)?;
        state
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn second_active_execution_is_rejected() {
        let store = MemoryAlarmStore::new();
        let first = AlarmExecution::scheduled("alarm-1", Utc::now());
        store.save_execution(&first).await.unwrap();

        let second = AlarmExecution::scheduled("alarm-1", Utc::now());
        assert!(store.save_execution(&second).await.is_err());
    }

    #[tokio::test]
    async fn terminal_execution_is_immutable() {
        let store = MemoryAlarmStore::new();
        let mut execution = AlarmExecution::scheduled("alarm-1", Utc::now());
        execution.status = ExecutionStatus::Completed;
        execution.motion_attempts = 3;
        store.save_execution(&execution).await.unwrap();

        let mut rewrite = execution.clone();
        rewrite.status = ExecutionStatus::Triggered;
        rewrite.motion_attempts = 0;
        store.save_execution(&rewrite).await.unwrap();

        let stored = store.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.motion_attempts, 3);

        let mut synced = execution.clone();
        synced.remote_synced = true;
        store.save_execution(&synced).await.unwrap();
        assert!(store.list_unsynced_executions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mirror_failure_injection_is_per_id() {
        let mirror = MemoryRemoteMirror::new();
        let good = AlarmDefinition::new("user-1", "Good", 7, 0);
        let bad = AlarmDefinition::new("user-1", "Bad", 8, 0);
        mirror.fail_writes_for(&bad.id);

        mirror.upsert_alarm(&good).await.unwrap();
        assert!(matches!(
            mirror.upsert_alarm(&bad).await,
            Err(AlarmError::SyncFailure { .. })
        ));
        assert_eq!(mirror.alarm_ids("user-1"), vec![good.id.clone()]);
    }
}
