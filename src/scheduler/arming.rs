use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, Utc};

use crate::error::{AlarmError, AlarmResult};
use crate::models::{AlarmDefinition, AlarmExecution, ExecutionStatus};
use crate::platform::{TriggerHandle, TriggerPayload, WakeTriggerApi};
use crate::recorder::ExecutionRecorder;
use crate::store::AlarmStore;

use super::next_fire::next_fire_date;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{alarm_debug, alarm_info, alarm_warn};

#[derive(Debug, Clone)]
struct ArmedTrigger {
    execution_id: String,
    handle: TriggerHandle,
}

/// Arms and disarms platform wake triggers. The trigger id is the alarm id,
/// so re-arming always replaces whatever was pending for that alarm.
pub struct TriggerScheduler {
    api: Arc<dyn WakeTriggerApi>,
    store: Arc<dyn AlarmStore>,
    recorder: Arc<ExecutionRecorder>,
    armed: Mutex<HashMap<String, ArmedTrigger>>,
}

impl TriggerScheduler {
    pub fn new(
        api: Arc<dyn WakeTriggerApi>,
        store: Arc<dyn AlarmStore>,
        recorder: Arc<ExecutionRecorder>,
    ) -> Self {
        Self {
            api,
            store,
            recorder,
            armed: Mutex::new(HashMap::new()),
        }
    }

    pub async fn arm(&self, alarm: &AlarmDefinition) -> AlarmResult<TriggerHandle> {
        self.arm_from(alarm, Utc::now()).await
    }

    /// Arm the occurrence after one that has just run. The search starts past
    /// `previous`, so a ring that ends inside its own minute is not re-booked.
    pub async fn arm_after(
        &self,
        alarm: &AlarmDefinition,
        previous: DateTime<Utc>,
    ) -> AlarmResult<TriggerHandle> {
        let from = Utc::now().max(previous + chrono::Duration::minutes(1));
        self.arm_from(alarm, from).await
    }

    /// Arm `alarm` for its next occurrence after `now` (device local time).
    pub async fn arm_from(
        &self,
        alarm: &AlarmDefinition,
        now: DateTime<Utc>,
    ) -> AlarmResult<TriggerHandle> {
        if !alarm.enabled {
            return Err(AlarmError::InvalidDefinition(format!(
                "alarm {} is disabled and cannot be armed",
                alarm.id
            )));
        }
        if !self.api.is_authorized() {
            return Err(AlarmError::PermissionDenied(
                "wake trigger scheduling has not been authorized".into(),
            ));
        }

        let fire_at = next_fire_date(alarm, &now.with_timezone(&Local))
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| AlarmError::schedule_conflict(&alarm.id, "no future occurrence"))?;
        if fire_at < now {
            return Err(AlarmError::schedule_conflict(
                &alarm.id,
                format!("computed fire date {fire_at} is in the past"),
            ));
        }

        match self.store.active_execution(&alarm.id).await? {
            Some(pending) if pending.status == ExecutionStatus::Scheduled => {
                self.recorder.discard(&pending.id).await?;
            }
            Some(in_flight) => {
                return Err(AlarmError::schedule_conflict(
                    &alarm.id,
                    format!(
                        "execution {} is still {}",
                        in_flight.id,
                        in_flight.status.as_str()
                    ),
                ));
            }
            None => {}
        }

        let execution = AlarmExecution::scheduled(&alarm.id, fire_at);
        self.recorder.record(&execution).await?;

        let payload = TriggerPayload {
            alarm_id: alarm.id.clone(),
            execution_id: execution.id.clone(),
            label: alarm.label.clone(),
            sound_id: alarm.sound.sound_id.clone(),
        };
        let handle = match self.api.schedule_trigger(&alarm.id, fire_at, payload) {
            Ok(handle) => handle,
            Err(err) => {
                if let Err(discard_err) = self.recorder.discard(&execution.id).await {
                    alarm_warn!(alarm.id, "failed to discard unarmed execution: {discard_err}");
                }
                return Err(err);
            }
        };

        self.armed().insert(
            alarm.id.clone(),
            ArmedTrigger {
                execution_id: execution.id.clone(),
                handle: handle.clone(),
            },
        );
        alarm_info!(
            alarm.id,
            "armed for {} (execution {})",
            fire_at.with_timezone(&Local),
            execution.id
        );
        Ok(handle)
    }

    /// Cancel the pending trigger and its scheduled execution. Safe to call
    /// for alarms that were never armed.
    pub async fn disarm(&self, alarm_id: &str) -> AlarmResult<()> {
        self.api.cancel_trigger(alarm_id);
        let removed = self.armed().remove(alarm_id);

        if let Some(pending) = self.store.active_execution(alarm_id).await? {
            if pending.status == ExecutionStatus::Scheduled {
                self.recorder.discard(&pending.id).await?;
            }
        }

        if let Some(armed) = removed {
            alarm_info!(alarm_id, "disarmed (execution {})", armed.execution_id);
        } else {
            alarm_debug!(alarm_id, "disarm requested but nothing was armed");
        }
        Ok(())
    }

    pub fn is_armed(&self, alarm_id: &str) -> bool {
        self.armed().contains_key(alarm_id)
    }

    pub fn armed_fire_date(&self, alarm_id: &str) -> Option<DateTime<Utc>> {
        self.armed().get(alarm_id).map(|armed| armed.handle.fire_at)
    }

    /// Forget the trigger once the platform has fired it.
    pub fn mark_fired(&self, alarm_id: &str) {
        self.armed().remove(alarm_id);
    }

    fn armed(&self) -> MutexGuard<'_, HashMap<String, ArmedTrigger>> {
        self.armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
