//! `AlarmEngine`: the control surface consumed by the presentation layer.
//!
//! Collaborators are injected through [`EngineDeps`]; the engine wires the
//! scheduler, supervisor, recorder and reconciler together and owns the
//! background tasks (finished-execution reaper, trigger listener, periodic
//! sync).

use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AlarmError, AlarmResult};
use crate::events::{AlarmStateStream, EventBus, ExecutionStateChanged};
use crate::locks::AlarmLocks;
use crate::models::{
    AlarmDefinition, AlarmExecution, CompletionStats, ExecutionStatus, MotionDetectionEvent,
    MotionSample,
};
use crate::motion::MotionEngine;
use crate::platform::{MotionSensor, TriggerFired, TriggerHandle, WakeTriggerApi};
use crate::recorder::ExecutionRecorder;
use crate::scheduler::TriggerScheduler;
use crate::settings::EngineSettings;
use crate::store::{AlarmStore, RemoteMirror};
use crate::supervisor::{AlarmStatusView, ExecutionSupervisor, FinishedExecution};
use crate::sync::{spawn_periodic, SyncReconciler, SyncReport};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{alarm_debug, alarm_error, alarm_info, alarm_warn};

/// Platform timers may run slightly ahead of the wall clock.
const EARLY_FIRE_TOLERANCE_SECS: i64 = 2;

pub struct EngineDeps {
    pub store: Arc<dyn AlarmStore>,
    pub remote: Arc<dyn RemoteMirror>,
    pub trigger: Arc<dyn WakeTriggerApi>,
    pub sensor: Arc<dyn MotionSensor>,
    pub settings: EngineSettings,
}

/// Outcome of start-up recovery.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Executions interrupted mid-ring and finalized as missed.
    pub missed: Vec<String>,
    pub armed: Vec<String>,
    /// Alarms that could not be armed, with the reason.
    pub failed: Vec<(String, String)>,
}

struct EngineInner {
    store: Arc<dyn AlarmStore>,
    remote: Arc<dyn RemoteMirror>,
    recorder: Arc<ExecutionRecorder>,
    scheduler: TriggerScheduler,
    supervisor: ExecutionSupervisor,
    reconciler: SyncReconciler,
    locks: Arc<AlarmLocks>,
    events: EventBus,
    settings: EngineSettings,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct AlarmEngine {
    inner: Arc<EngineInner>,
}

impl AlarmEngine {
    /// Build the engine, recover state left by a previous process and start
    /// the finished-execution reaper.
    pub async fn start(deps: EngineDeps) -> AlarmResult<Self> {
        let EngineDeps {
            store,
            remote,
            trigger,
            sensor,
            settings,
        } = deps;

        let events = EventBus::new();
        let locks = Arc::new(AlarmLocks::new());
        let recorder = Arc::new(ExecutionRecorder::new(
            store.clone(),
            remote.clone(),
            settings.recording.max_samples_per_execution,
        ));
        let motion = MotionEngine::new(sensor, settings.motion.clone());
        let scheduler = TriggerScheduler::new(trigger, store.clone(), recorder.clone());
        let (supervisor, finished_rx) = ExecutionSupervisor::new(
            motion,
            recorder.clone(),
            events.clone(),
            settings.supervision_timeout(),
        );
        let reconciler =
            SyncReconciler::new(store.clone(), remote.clone(), recorder.clone(), locks.clone());

        let engine = Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                recorder,
                scheduler,
                supervisor,
                reconciler,
                locks,
                events,
                settings,
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let report = engine.recover().await?;
        log::info!(
            "Alarm engine started: {} armed, {} interrupted executions missed, {} arming failures",
            report.armed.len(),
            report.missed.len(),
            report.failed.len()
        );

        let reaper = tokio::spawn(reap_finished(
            Arc::downgrade(&engine.inner),
            finished_rx,
            engine.inner.shutdown.clone(),
        ));
        engine.track(reaper);
        Ok(engine)
    }

    // ----- control surface -------------------------------------------------

    /// Create (or overwrite) an alarm and arm it when enabled.
    pub async fn schedule_alarm(&self, alarm: AlarmDefinition) -> AlarmResult<Option<TriggerHandle>> {
        alarm.validate()?;
        let _guard = self.inner.locks.lock(&alarm.id).await;

        self.inner.store.clear_tombstone(&alarm.id).await?;
        self.inner.store.upsert_alarm(&alarm).await?;
        self.mirror_upsert(&alarm).await;
        alarm_info!(alarm.id, "scheduled \"{}\" at {:02}:{:02}", alarm.label, alarm.hour, alarm.minute);

        if alarm.enabled {
            self.inner.scheduler.arm(&alarm).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Replace an existing definition. A ringing execution keeps running
    /// with its original settings; the new definition applies from the
    /// next occurrence.
    pub async fn update_alarm(&self, alarm: AlarmDefinition) -> AlarmResult<Option<TriggerHandle>> {
        alarm.validate()?;
        let _guard = self.inner.locks.lock(&alarm.id).await;

        let existing = self.require_alarm(&alarm.id).await?;
        let mut alarm = alarm;
        alarm.created_at = existing.created_at;
        alarm.updated_at = Utc::now();
        self.inner.store.upsert_alarm(&alarm).await?;
        self.mirror_upsert(&alarm).await;
        alarm_info!(alarm.id, "updated");

        self.rearm_unless_live(&alarm).await
    }

    /// Delete an alarm. A live execution is marked missed and its sensor
    /// session and snooze timer are torn down before this returns.
    pub async fn cancel_alarm(&self, alarm_id: &str) -> AlarmResult<()> {
        let _guard = self.inner.locks.lock(alarm_id).await;

        let alarm = self.require_alarm(alarm_id).await?;
        self.inner.store.delete_alarm(alarm_id).await?;
        self.inner
            .store
            .record_tombstone(alarm_id, &alarm.user_id, Utc::now())
            .await?;

        if let Some(status) = self.inner.supervisor.cancel(alarm_id).await {
            alarm_info!(alarm_id, "deleted while ringing, execution ended {}", status.as_str());
        }
        self.inner.scheduler.disarm(alarm_id).await?;

        match self.inner.remote.delete_alarm(&alarm.user_id, alarm_id).await {
            Ok(()) => self.inner.store.clear_tombstone(alarm_id).await?,
            Err(err) => alarm_warn!(alarm_id, "remote delete deferred to next sync: {err}"),
        }
        alarm_info!(alarm_id, "deleted");
        Ok(())
    }

    pub async fn toggle_alarm(
        &self,
        alarm_id: &str,
        enabled: bool,
    ) -> AlarmResult<Option<TriggerHandle>> {
        let _guard = self.inner.locks.lock(alarm_id).await;

        let mut alarm = self.require_alarm(alarm_id).await?;
        if alarm.enabled != enabled {
            alarm.enabled = enabled;
            alarm.updated_at = Utc::now();
            self.inner.store.upsert_alarm(&alarm).await?;
            self.mirror_upsert(&alarm).await;
            alarm_info!(alarm_id, "{}", if enabled { "enabled" } else { "disabled" });
        }

        self.rearm_unless_live(&alarm).await
    }

    /// Stop the ringing execution. Stopping an alarm that is not ringing is
    /// a no-op.
    pub async fn stop_alarm(&self, alarm_id: &str) -> AlarmResult<Option<ExecutionStatus>> {
        match self.inner.supervisor.stop(alarm_id).await {
            Some(status) => Ok(Some(status)),
            None => self.require_alarm(alarm_id).await.map(|_| None),
        }
    }

    /// Snooze the ringing execution. Ignored when the snooze limit is spent
    /// or the alarm is not ringing.
    pub async fn snooze_alarm(&self, alarm_id: &str) -> AlarmResult<Option<ExecutionStatus>> {
        match self.inner.supervisor.snooze(alarm_id).await {
            Some(status) => Ok(Some(status)),
            None => self.require_alarm(alarm_id).await.map(|_| None),
        }
    }

    /// Presentation status; `None` for unknown alarms.
    pub async fn get_status(&self, alarm_id: &str) -> AlarmResult<Option<AlarmStatusView>> {
        let Some(alarm) = self.inner.store.get_alarm(alarm_id).await? else {
            return Ok(None);
        };
        Ok(Some(AlarmStatusView::project(
            &alarm,
            self.inner.supervisor.status(alarm_id),
            self.inner.scheduler.is_armed(alarm_id),
        )))
    }

    // ----- trigger handling ------------------------------------------------

    /// Platform callback: the wake trigger for `alarm_id` fired.
    ///
    /// Returns the status of the execution it started, or `None` when the
    /// callback was stale (early, duplicated, for a disabled alarm, or with
    /// nothing armed) and has been absorbed.
    pub async fn handle_trigger_fired(
        &self,
        alarm_id: &str,
        fired_at: DateTime<Utc>,
    ) -> AlarmResult<Option<ExecutionStatus>> {
        self.fire(alarm_id, None, fired_at).await
    }

    /// Forward fired triggers from the platform into the engine.
    pub fn spawn_trigger_listener(&self, mut fired: mpsc::UnboundedReceiver<TriggerFired>) {
        let engine = self.clone();
        let cancel = self.inner.shutdown.clone();
        let task = tokio::spawn(async move {
            loop {
                let fired = tokio::select! {
                    _ = cancel.cancelled() => break,
                    fired = fired.recv() => match fired {
                        Some(fired) => fired,
                        None => break,
                    },
                };
                let TriggerFired { payload, fired_at } = fired;
                let result = engine
                    .fire(&payload.alarm_id, Some(&payload.execution_id), fired_at)
                    .await;
                if let Err(err) = result {
                    alarm_error!(payload.alarm_id, "failed to start execution: {err}");
                }
            }
            log::debug!("Trigger listener stopped");
        });
        self.track(task);
    }

    // ----- recovery & sync -------------------------------------------------

    /// Finalize executions interrupted by a previous shutdown and re-arm
    /// every enabled alarm.
    pub async fn recover(&self) -> AlarmResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for execution in self.inner.store.list_active_executions().await? {
            if self.inner.supervisor.is_live(&execution.alarm_id) {
                continue;
            }
            if execution.status == ExecutionStatus::Scheduled {
                self.inner.recorder.discard(&execution.id).await?;
                continue;
            }
            report.missed.push(execution.id.clone());
            self.finalize_missed(execution).await?;
        }

        for alarm in self.inner.store.list_enabled_alarms().await? {
            let _guard = self.inner.locks.lock(&alarm.id).await;
            if self.inner.supervisor.is_live(&alarm.id) {
                continue;
            }
            match self.inner.scheduler.arm(&alarm).await {
                Ok(_) => report.armed.push(alarm.id.clone()),
                Err(err) => {
                    alarm_error!(alarm.id, "could not be re-armed: {err}");
                    report.failed.push((alarm.id.clone(), err.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Reconcile with the remote mirror and arm any alarm pulled from it.
    pub async fn reconcile(&self, user_id: &str) -> AlarmResult<SyncReport> {
        let mut report = self.inner.reconciler.reconcile(user_id).await?;

        for alarm in report.pulled.iter().filter(|alarm| alarm.enabled) {
            let _guard = self.inner.locks.lock(&alarm.id).await;
            if let Err(err) = self.inner.scheduler.arm(alarm).await {
                alarm_warn!(alarm.id, "pulled alarm could not be armed: {err}");
                report.failures.push(err);
            }
        }
        Ok(report)
    }

    /// Reconcile `user_id` every sync interval (± jitter) until shutdown or
    /// until the returned token is cancelled.
    pub fn spawn_periodic_sync(&self, user_id: &str) -> CancellationToken {
        let cancel = self.inner.shutdown.child_token();
        let engine = self.clone();
        let user_id = user_id.to_string();
        let task = spawn_periodic(self.inner.settings.sync.clone(), cancel.clone(), move || {
            let engine = engine.clone();
            let user_id = user_id.clone();
            async move {
                if let Err(err) = engine.reconcile(&user_id).await {
                    log::warn!("Periodic sync for {user_id} failed: {err}");
                }
            }
        });
        self.track(task);
        cancel
    }

    // ----- queries & subscriptions -----------------------------------------

    pub async fn list_alarms(&self, user_id: &str) -> AlarmResult<Vec<AlarmDefinition>> {
        self.inner.store.list_alarms(user_id).await
    }

    pub async fn get_alarm(&self, alarm_id: &str) -> AlarmResult<Option<AlarmDefinition>> {
        self.inner.store.get_alarm(alarm_id).await
    }

    /// Newest first.
    pub async fn list_executions(&self, alarm_id: &str) -> AlarmResult<Vec<AlarmExecution>> {
        self.inner.store.list_executions(alarm_id).await
    }

    pub async fn list_motion_samples(&self, execution_id: &str) -> AlarmResult<Vec<MotionSample>> {
        self.inner.store.list_motion_samples(execution_id).await
    }

    pub async fn completion_stats(&self, alarm_id: &str) -> AlarmResult<CompletionStats> {
        self.inner.store.completion_stats(alarm_id).await
    }

    pub fn next_fire_date(&self, alarm_id: &str) -> Option<DateTime<Utc>> {
        self.inner.scheduler.armed_fire_date(alarm_id)
    }

    pub fn subscribe_motion(&self) -> broadcast::Receiver<MotionDetectionEvent> {
        self.inner.events.subscribe_motion()
    }

    pub fn subscribe_state(&self, alarm_id: &str) -> AlarmStateStream {
        self.inner.events.subscribe_alarm_state(alarm_id)
    }

    pub fn subscribe_all_states(&self) -> broadcast::Receiver<ExecutionStateChanged> {
        self.inner.events.subscribe_state()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Stop background tasks and abort live executions. Interrupted
    /// executions are finalized as missed by the next `recover`.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.supervisor.shutdown();
        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        log::info!("Alarm engine stopped");
    }

    // ----- internals -------------------------------------------------------

    /// `fired_execution` is the execution id the trigger was armed with, when
    /// the platform hands it back.
    async fn fire(
        &self,
        alarm_id: &str,
        fired_execution: Option<&str>,
        fired_at: DateTime<Utc>,
    ) -> AlarmResult<Option<ExecutionStatus>> {
        let _guard = self.inner.locks.lock(alarm_id).await;

        let alarm = self.require_alarm(alarm_id).await?;
        if !alarm.enabled {
            alarm_warn!(alarm_id, "trigger fired for a disabled alarm, ignoring");
            return Ok(None);
        }
        if let Some(status) = self.inner.supervisor.status(alarm_id) {
            alarm_debug!(alarm_id, "duplicate trigger while {}, ignoring", status.as_str());
            return Ok(None);
        }

        let pending = match self.inner.store.active_execution(alarm_id).await? {
            Some(pending) if pending.status == ExecutionStatus::Scheduled => pending,
            Some(stale) => {
                // Left over from an actor that no longer exists.
                let previous = stale.scheduled_time;
                self.finalize_missed(stale).await?;
                if let Err(err) = self.inner.scheduler.arm_after(&alarm, previous).await {
                    alarm_error!(alarm_id, "could not re-arm after a lost execution: {err}");
                }
                return Ok(None);
            }
            None => {
                alarm_warn!(alarm_id, "trigger fired with nothing armed, ignoring");
                return Ok(None);
            }
        };

        if let Some(fired_id) = fired_execution.filter(|id| *id != pending.id) {
            alarm_warn!(
                alarm_id,
                "stale trigger for execution {fired_id}, {} is armed, ignoring",
                pending.id
            );
            return Ok(None);
        }
        if fired_at + Duration::seconds(EARLY_FIRE_TOLERANCE_SECS) < pending.scheduled_time {
            alarm_warn!(
                alarm_id,
                "trigger fired at {fired_at}, before {} is due, ignoring",
                pending.scheduled_time
            );
            return Ok(None);
        }

        self.inner.scheduler.mark_fired(alarm_id);
        self.inner
            .supervisor
            .begin(&alarm, pending, fired_at)
            .await
            .map(Some)
    }

    async fn require_alarm(&self, alarm_id: &str) -> AlarmResult<AlarmDefinition> {
        self.inner
            .store
            .get_alarm(alarm_id)
            .await?
            .ok_or_else(|| AlarmError::EntityNotFound(format!("alarm {alarm_id}")))
    }

    async fn rearm_unless_live(&self, alarm: &AlarmDefinition) -> AlarmResult<Option<TriggerHandle>> {
        if !alarm.enabled {
            self.inner.scheduler.disarm(&alarm.id).await?;
            return Ok(None);
        }
        if self.inner.supervisor.is_live(&alarm.id) {
            return Ok(None);
        }
        self.inner.scheduler.arm(alarm).await.map(Some)
    }

    /// Local is the source of truth; the mirror catches up on the next sync
    /// for new ids, and on the next edit otherwise.
    async fn mirror_upsert(&self, alarm: &AlarmDefinition) {
        if let Err(err) = self.inner.remote.upsert_alarm(alarm).await {
            alarm_warn!(alarm.id, "remote upsert deferred: {err}");
        }
    }

    async fn finalize_missed(&self, mut execution: AlarmExecution) -> AlarmResult<()> {
        let now = Utc::now();
        execution.status = ExecutionStatus::Missed;
        execution.completed_time = Some(now);
        execution.updated_at = now;
        alarm_warn!(execution.alarm_id, "execution {} interrupted, marked missed", execution.id);
        self.inner.recorder.finalize(&execution).await
    }

    /// Called once per finished execution: repeating alarms are armed for
    /// their next occurrence, one-shot alarms are switched off.
    async fn on_finished(&self, finished: FinishedExecution) {
        let FinishedExecution {
            alarm_id,
            execution,
        } = finished;
        self.inner.supervisor.reap(&alarm_id, &execution.id);

        let _guard = self.inner.locks.lock(&alarm_id).await;
        if self.inner.supervisor.is_live(&alarm_id) {
            return;
        }
        let alarm = match self.inner.store.get_alarm(&alarm_id).await {
            Ok(Some(alarm)) => alarm,
            Ok(None) => return,
            Err(err) => {
                alarm_error!(alarm_id, "could not load definition after execution: {err}");
                return;
            }
        };

        if alarm.is_repeating() {
            if alarm.enabled {
                let result = self
                    .inner
                    .scheduler
                    .arm_after(&alarm, execution.scheduled_time)
                    .await;
                if let Err(err) = result {
                    alarm_error!(alarm_id, "could not re-arm for next occurrence: {err}");
                }
            }
            return;
        }

        if alarm.enabled {
            let mut alarm = alarm;
            alarm.enabled = false;
            alarm.updated_at = Utc::now();
            if let Err(err) = self.inner.store.upsert_alarm(&alarm).await {
                alarm_error!(alarm_id, "could not disable finished one-shot alarm: {err}");
                return;
            }
            self.mirror_upsert(&alarm).await;
            alarm_info!(alarm_id, "one-shot alarm finished ({}), disabled", execution.status.as_str());
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}

async fn reap_finished(
    engine: Weak<EngineInner>,
    mut finished: mpsc::UnboundedReceiver<FinishedExecution>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = finished.recv() => next,
        };
        let Some(next) = next else { break };
        let Some(inner) = engine.upgrade() else { break };
        AlarmEngine { inner }.on_finished(next).await;
    }
    log::debug!("Execution reaper stopped");
}
