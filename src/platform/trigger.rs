use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AlarmError, AlarmResult};

/// Data attached to an armed trigger and handed back when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    pub alarm_id: String,
    pub execution_id: String,
    pub label: String,
    pub sound_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerHandle {
    pub trigger_id: String,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFired {
    pub payload: TriggerPayload,
    pub fired_at: DateTime<Utc>,
}

/// Platform primitive that fires once at an absolute wall-clock time under a
/// caller-chosen identifier. Scheduling an id that is already armed replaces it.
pub trait WakeTriggerApi: Send + Sync {
    fn is_authorized(&self) -> bool;
    fn schedule_trigger(
        &self,
        trigger_id: &str,
        fire_at: DateTime<Utc>,
        payload: TriggerPayload,
    ) -> AlarmResult<TriggerHandle>;
    /// Cancelling an unknown id is a no-op.
    fn cancel_trigger(&self, trigger_id: &str);
}

/// Wake triggers backed by tokio timers; fired triggers are delivered on the
/// channel returned from [`TokioWakeTrigger::new`].
pub struct TokioWakeTrigger {
    authorized: AtomicBool,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
    fired_tx: mpsc::UnboundedSender<TriggerFired>,
}

impl TokioWakeTrigger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TriggerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Self {
                authorized: AtomicBool::new(true),
                pending: Mutex::new(HashMap::new()),
                fired_tx,
            },
            fired_rx,
        )
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn is_armed(&self, trigger_id: &str) -> bool {
        self.pending()
            .get(trigger_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WakeTriggerApi for TokioWakeTrigger {
    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    fn schedule_trigger(
        &self,
        trigger_id: &str,
        fire_at: DateTime<Utc>,
        payload: TriggerPayload,
    ) -> AlarmResult<TriggerHandle> {
        if !self.is_authorized() {
            return Err(AlarmError::PermissionDenied(
                "wake triggers are not authorized".into(),
            ));
        }

        let delay = (fire_at - Utc::now()).to_std().unwrap_or_default();
        let fired_tx = self.fired_tx.clone();
        let id_for_task = trigger_id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("Wake trigger {id_for_task} fired");
            // The timer runs on tokio's clock, which need not track wall time.
            let _ = fired_tx.send(TriggerFired {
                payload,
                fired_at: Utc::now().max(fire_at),
            });
        });

        if let Some(previous) = self.pending().insert(trigger_id.to_string(), task) {
            previous.abort();
        }
        info!("Wake trigger {trigger_id} armed for {fire_at}");

        Ok(TriggerHandle {
            trigger_id: trigger_id.to_string(),
            fire_at,
        })
    }

    fn cancel_trigger(&self, trigger_id: &str) {
        if let Some(task) = self.pending().remove(trigger_id) {
            task.abort();
            info!("Wake trigger {trigger_id} cancelled");
        }
    }
}
