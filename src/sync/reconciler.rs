use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{AlarmError, AlarmResult};
use crate::locks::AlarmLocks;
use crate::models::AlarmDefinition;
use crate::recorder::ExecutionRecorder;
use crate::store::{AlarmStore, RemoteMirror};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{alarm_debug, alarm_info, alarm_warn};

/// What one reconciliation pass did. Failures are per item; everything else
/// in the pass was still attempted.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Remote alarms inserted locally.
    pub pulled: Vec<AlarmDefinition>,
    /// Local alarm ids upserted remotely.
    pub pushed: Vec<String>,
    /// Tombstoned ids removed from the remote mirror.
    pub deleted_remote: Vec<String>,
    pub executions_pushed: usize,
    pub failures: Vec<AlarmError>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Presence-based union merge between the local store and the remote mirror.
///
/// Alarms are matched by id only. When both sides hold an id neither copy is
/// touched; edits travel through the control surface, not through here.
pub struct SyncReconciler {
    store: Arc<dyn AlarmStore>,
    remote: Arc<dyn RemoteMirror>,
    recorder: Arc<ExecutionRecorder>,
    locks: Arc<AlarmLocks>,
}

impl SyncReconciler {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        remote: Arc<dyn RemoteMirror>,
        recorder: Arc<ExecutionRecorder>,
        locks: Arc<AlarmLocks>,
    ) -> Self {
        Self {
            store,
            remote,
            recorder,
            locks,
        }
    }

    /// Only a local storage failure aborts the pass; remote failures end up
    /// in [`SyncReport::failures`].
    pub async fn reconcile(&self, user_id: &str) -> AlarmResult<SyncReport> {
        let mut report = SyncReport::default();

        let local = self.store.list_alarms(user_id).await?;
        let tombstones: HashSet<String> =
            self.store.list_tombstones(user_id).await?.into_iter().collect();

        match self.remote.fetch_alarms(user_id).await {
            Ok(remote) => {
                let local_ids: HashSet<&str> = local.iter().map(|alarm| alarm.id.as_str()).collect();
                let remote_ids: HashSet<&str> =
                    remote.iter().map(|alarm| alarm.id.as_str()).collect();

                for alarm in remote.iter().filter(|alarm| !local_ids.contains(alarm.id.as_str())) {
                    if tombstones.contains(&alarm.id) {
                        alarm_debug!(alarm.id, "not pulled, deleted locally");
                        continue;
                    }
                    match self.pull(user_id, alarm).await {
                        Ok(true) => report.pulled.push(alarm.clone()),
                        Ok(false) => {}
                        Err(err) => report.failures.push(err),
                    }
                }

                for alarm in local.iter().filter(|alarm| !remote_ids.contains(alarm.id.as_str())) {
                    match self.push(alarm).await {
                        Ok(true) => report.pushed.push(alarm.id.clone()),
                        Ok(false) => {}
                        Err(err) => report.failures.push(err),
                    }
                }

                for alarm_id in &tombstones {
                    if remote_ids.contains(alarm_id.as_str()) {
                        match self.delete_remote(user_id, alarm_id).await {
                            Ok(()) => report.deleted_remote.push(alarm_id.clone()),
                            Err(err) => report.failures.push(err),
                        }
                    } else if let Err(err) = self.store.clear_tombstone(alarm_id).await {
                        report.failures.push(err);
                    }
                }
            }
            Err(err) => {
                log::warn!("Remote fetch for user {user_id} failed, alarm diff skipped: {err}");
                report.failures.push(err);

                for alarm_id in &tombstones {
                    match self.delete_remote(user_id, alarm_id).await {
                        Ok(()) => report.deleted_remote.push(alarm_id.clone()),
                        Err(err) => report.failures.push(err),
                    }
                }
            }
        }

        for execution in self.store.list_unsynced_executions().await? {
            match self.recorder.push_remote(&execution).await {
                Ok(()) => report.executions_pushed += 1,
                Err(err) => {
                    alarm_warn!(execution.alarm_id, "execution {} still unsynced: {err}", execution.id);
                    report.failures.push(err);
                }
            }
        }

        log::info!(
            "Reconciled alarms for {user_id}: {} pulled, {} pushed, {} remote deletes, {} executions, {} failures",
            report.pulled.len(),
            report.pushed.len(),
            report.deleted_remote.len(),
            report.executions_pushed,
            report.failures.len()
        );
        Ok(report)
    }

    /// Insert a remote-only alarm. Re-checked under the alarm lock so a
    /// concurrent delete is never undone.
    async fn pull(&self, user_id: &str, alarm: &AlarmDefinition) -> AlarmResult<bool> {
        let _guard = self.locks.lock(&alarm.id).await;
        if self.store.get_alarm(&alarm.id).await?.is_some() {
            return Ok(false);
        }
        let tombstoned = self
            .store
            .list_tombstones(user_id)
            .await?
            .iter()
            .any(|id| id == &alarm.id);
        if tombstoned {
            return Ok(false);
        }
        self.store.upsert_alarm(alarm).await?;
        alarm_info!(alarm.id, "pulled from remote mirror");
        Ok(true)
    }

    async fn push(&self, alarm: &AlarmDefinition) -> AlarmResult<bool> {
        let _guard = self.locks.lock(&alarm.id).await;
        let Some(current) = self.store.get_alarm(&alarm.id).await? else {
            return Ok(false);
        };
        self.remote.upsert_alarm(&current).await?;
        alarm_info!(alarm.id, "pushed to remote mirror");
        Ok(true)
    }

    async fn delete_remote(&self, user_id: &str, alarm_id: &str) -> AlarmResult<()> {
        let _guard = self.locks.lock(alarm_id).await;
        self.remote.delete_alarm(user_id, alarm_id).await?;
        self.store.clear_tombstone(alarm_id).await?;
        alarm_info!(alarm_id, "deletion propagated to remote mirror");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryAlarmStore, MemoryRemoteMirror};
    use chrono::Utc;

    struct Fixture {
        store: Arc<MemoryAlarmStore>,
        remote: Arc<MemoryRemoteMirror>,
        reconciler: SyncReconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryAlarmStore::new());
        let remote = Arc::new(MemoryRemoteMirror::new());
        let recorder = Arc::new(ExecutionRecorder::new(store.clone(), remote.clone(), 10));
        let reconciler = SyncReconciler::new(
            store.clone(),
            remote.clone(),
            recorder,
            Arc::new(AlarmLocks::new()),
        );
        Fixture {
            store,
            remote,
            reconciler,
        }
    }

    async fn local_ids(store: &MemoryAlarmStore, user: &str) -> Vec<String> {
        let mut ids: Vec<_> = store
            .list_alarms(user)
            .await
            .unwrap()
            .into_iter()
            .map(|alarm| alarm.id)
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn union_merge_converges() {
        let f = fixture();
        let local_only = AlarmDefinition::new("user", "Local", 6, 0);
        let remote_only = AlarmDefinition::new("user", "Remote", 7, 0);
        let other_user = AlarmDefinition::new("someone-else", "Theirs", 8, 0);
        f.store.upsert_alarm(&local_only).await.unwrap();
        f.remote.upsert_alarm(&remote_only).await.unwrap();
        f.remote.upsert_alarm(&other_user).await.unwrap();

        let report = f.reconciler.reconcile("user").await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.pulled.len(), 1);
        assert_eq!(report.pushed, vec![local_only.id.clone()]);
        let mut remote_ids = f.remote.alarm_ids("user");
        remote_ids.sort();
        assert_eq!(local_ids(&f.store, "user").await, remote_ids);
        assert!(f.store.get_alarm(&other_user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_failed_push_does_not_abort_the_pass() {
        let f = fixture();
        let good = AlarmDefinition::new("user", "Good", 6, 0);
        let bad = AlarmDefinition::new("user", "Bad", 7, 0);
        let remote_only = AlarmDefinition::new("user", "Remote", 8, 0);
        f.store.upsert_alarm(&good).await.unwrap();
        f.store.upsert_alarm(&bad).await.unwrap();
        f.remote.upsert_alarm(&remote_only).await.unwrap();
        f.remote.fail_writes_for(&bad.id);

        let report = f.reconciler.reconcile("user").await.unwrap();

        assert_eq!(report.pushed, vec![good.id.clone()]);
        assert_eq!(report.pulled.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            AlarmError::SyncFailure { id, .. } if id == &bad.id
        ));

        f.remote.clear_failures();
        let report = f.reconciler.reconcile("user").await.unwrap();
        assert_eq!(report.pushed, vec![bad.id.clone()]);
    }

    #[tokio::test]
    async fn tombstones_keep_deleted_alarms_dead() {
        let f = fixture();
        let alarm = AlarmDefinition::new("user", "Deleted", 6, 0);
        f.remote.upsert_alarm(&alarm).await.unwrap();
        f.store
            .record_tombstone(&alarm.id, "user", Utc::now())
            .await
            .unwrap();

        f.remote.set_offline(true);
        let report = f.reconciler.reconcile("user").await.unwrap();
        assert!(report.pulled.is_empty());
        assert!(!report.is_clean());
        assert_eq!(f.store.list_tombstones("user").await.unwrap().len(), 1);

        f.remote.set_offline(false);
        let report = f.reconciler.reconcile("user").await.unwrap();
        assert!(report.pulled.is_empty());
        assert_eq!(report.deleted_remote, vec![alarm.id.clone()]);
        assert!(f.remote.alarm_ids("user").is_empty());
        assert!(f.store.list_tombstones("user").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_id_on_both_sides_is_left_alone() {
        let f = fixture();
        let mut local = AlarmDefinition::new("user", "Local label", 6, 0);
        let mut remote = local.clone();
        remote.label = "Remote label".into();
        remote.hour = 9;
        local.enabled = false;
        f.store.upsert_alarm(&local).await.unwrap();
        f.remote.upsert_alarm(&remote).await.unwrap();

        let report = f.reconciler.reconcile("user").await.unwrap();

        assert!(report.pulled.is_empty() && report.pushed.is_empty());
        let stored = f.store.get_alarm(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.label, "Local label");
    }
}
