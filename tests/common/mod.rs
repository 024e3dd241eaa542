#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use wakeproof::error::{AlarmError, AlarmResult};
use wakeproof::events::{AlarmStateStream, ExecutionStateChanged};
use wakeproof::models::{AlarmDefinition, ExecutionStatus, MissionConfig, MotionSample, SnoozeConfig, Vector3};
use wakeproof::platform::{ChannelSensor, TriggerHandle, TriggerPayload, WakeTriggerApi};
use wakeproof::store::{MemoryAlarmStore, MemoryRemoteMirror};
use wakeproof::{AlarmEngine, EngineDeps, EngineSettings};

pub const USER: &str = "user-1";

/// Wake trigger that only records what it was asked to do; tests fire
/// triggers through [`ring`].
#[derive(Default)]
pub struct RecordingTrigger {
    denied: AtomicBool,
    pending: Mutex<HashMap<String, DateTime<Utc>>>,
    schedule_calls: Mutex<Vec<String>>,
    cancel_calls: Mutex<Vec<String>>,
}

impl RecordingTrigger {
    pub fn set_authorized(&self, authorized: bool) {
        self.denied.store(!authorized, Ordering::SeqCst);
    }

    pub fn pending_fire_date(&self, alarm_id: &str) -> Option<DateTime<Utc>> {
        self.pending.lock().unwrap().get(alarm_id).copied()
    }

    pub fn schedule_count(&self, alarm_id: &str) -> usize {
        self.schedule_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == alarm_id)
            .count()
    }

    pub fn was_cancelled(&self, alarm_id: &str) -> bool {
        self.cancel_calls.lock().unwrap().iter().any(|id| id == alarm_id)
    }
}

impl WakeTriggerApi for RecordingTrigger {
    fn is_authorized(&self) -> bool {
        !self.denied.load(Ordering::SeqCst)
    }

    fn schedule_trigger(
        &self,
        trigger_id: &str,
        fire_at: DateTime<Utc>,
        _payload: TriggerPayload,
    ) -> AlarmResult<TriggerHandle> {
        if !self.is_authorized() {
            return Err(AlarmError::PermissionDenied("test trigger denied".into()));
        }
        self.pending
            .lock()
            .unwrap()
            .insert(trigger_id.to_string(), fire_at);
        self.schedule_calls.lock().unwrap().push(trigger_id.to_string());
        Ok(TriggerHandle {
            trigger_id: trigger_id.to_string(),
            fire_at,
        })
    }

    fn cancel_trigger(&self, trigger_id: &str) {
        self.pending.lock().unwrap().remove(trigger_id);
        self.cancel_calls.lock().unwrap().push(trigger_id.to_string());
    }
}

pub struct Harness {
    pub engine: AlarmEngine,
    pub store: Arc<MemoryAlarmStore>,
    pub remote: Arc<MemoryRemoteMirror>,
    pub trigger: Arc<RecordingTrigger>,
    pub sensor: Arc<ChannelSensor>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_store(Arc::new(MemoryAlarmStore::new()), EngineSettings::default()).await
    }

    pub async fn with_store(store: Arc<MemoryAlarmStore>, settings: EngineSettings) -> Self {
        let remote = Arc::new(MemoryRemoteMirror::new());
        let trigger = Arc::new(RecordingTrigger::default());
        let sensor = Arc::new(ChannelSensor::new());
        let engine = AlarmEngine::start(EngineDeps {
            store: store.clone(),
            remote: remote.clone(),
            trigger: trigger.clone(),
            sensor: sensor.clone(),
            settings,
        })
        .await
        .expect("engine starts");
        Self {
            engine,
            store,
            remote,
            trigger,
            sensor,
        }
    }
}

/// Fire the alarm's trigger at its armed date, the way the platform would,
/// and return the status of the execution it started.
pub async fn ring(h: &Harness, alarm_id: &str) -> ExecutionStatus {
    let fired_at = h
        .engine
        .next_fire_date(alarm_id)
        .expect("alarm is armed");
    h.engine
        .handle_trigger_fired(alarm_id, fired_at)
        .await
        .expect("trigger handled")
        .expect("trigger started an execution")
}

pub fn motion_alarm(required_count: u32, snooze: SnoozeConfig) -> AlarmDefinition {
    let mut alarm = AlarmDefinition::new(USER, "Wake up", 7, 0);
    alarm.mission = MissionConfig::Motion { required_count };
    alarm.snooze = snooze;
    alarm
}

pub fn snooze_limit(max_count: u32, interval_secs: u64) -> SnoozeConfig {
    SnoozeConfig {
        enabled: true,
        interval_secs,
        max_count,
    }
}

/// Feed enough sustained movement for `events` debounced detections with
/// the default debounce of three samples.
pub fn shake(sensor: &ChannelSensor, events: usize) {
    let start = Utc::now();
    for i in 0..events * 3 {
        sensor.feed(MotionSample::new(
            start + chrono::Duration::milliseconds(i as i64 * 20),
            Vector3::new(1.6, 1.2, 1.0),
            Vector3::new(0.3, 0.1, 0.0),
        ));
    }
}

/// Wait until the alarm's state stream reports `status`. `limit` is in
/// tokio time, so paused-clock tests can wait through long timers.
pub async fn wait_for(
    stream: &mut AlarmStateStream,
    status: ExecutionStatus,
    limit: Duration,
) -> ExecutionStateChanged {
    tokio::time::timeout(limit, async {
        loop {
            let change = stream.next().await.expect("event bus closed");
            if change.status == status {
                return change;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {status:?}"))
}

/// Poll `check` until it holds; used for work done by the background reaper.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}
