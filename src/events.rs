//! Typed publish/subscribe channels owned by the engine.
//!
//! Subscribers get a `tokio::sync::broadcast` receiver; slow subscribers
//! lose old events rather than back-pressuring the supervisors.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{AlarmExecution, ExecutionStatus, MotionDetectionEvent};

const MOTION_CHANNEL_CAPACITY: usize = 64;
const STATE_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStateChanged {
    pub alarm_id: String,
    pub status: ExecutionStatus,
    pub execution: AlarmExecution,
}

#[derive(Clone)]
pub struct EventBus {
    motion: broadcast::Sender<MotionDetectionEvent>,
    state: broadcast::Sender<ExecutionStateChanged>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (motion, _) = broadcast::channel(MOTION_CHANNEL_CAPACITY);
        let (state, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self { motion, state }
    }

    pub fn publish_motion(&self, event: MotionDetectionEvent) {
        let _ = self.motion.send(event);
    }

    pub fn publish_state(&self, execution: &AlarmExecution, status: ExecutionStatus) {
        let _ = self.state.send(ExecutionStateChanged {
            alarm_id: execution.alarm_id.clone(),
            status,
            execution: execution.clone(),
        });
    }

    pub fn subscribe_motion(&self) -> broadcast::Receiver<MotionDetectionEvent> {
        self.motion.subscribe()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<ExecutionStateChanged> {
        self.state.subscribe()
    }

    pub fn subscribe_alarm_state(&self, alarm_id: &str) -> AlarmStateStream {
        AlarmStateStream {
            alarm_id: alarm_id.to_string(),
            receiver: self.state.subscribe(),
        }
    }
}

/// State changes for a single alarm, for continuous live display.
pub struct AlarmStateStream {
    alarm_id: String,
    receiver: broadcast::Receiver<ExecutionStateChanged>,
}

impl AlarmStateStream {
    /// Next change for this alarm; `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<ExecutionStateChanged> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.alarm_id == self.alarm_id => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "[alarm {}] state subscriber lagged by {skipped} events",
                        self.alarm_id
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
