use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{AlarmError, AlarmResult};
use crate::events::EventBus;
use crate::models::{AlarmDefinition, AlarmExecution, ExecutionStatus};
use crate::motion::MotionEngine;
use crate::recorder::ExecutionRecorder;

use super::actor::{Command, ExecutionActor, FinishedExecution};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{alarm_debug, alarm_info};

const COMMAND_BUFFER: usize = 16;

struct ActorHandle {
    execution_id: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ExecutionStatus>,
    task: JoinHandle<()>,
}

impl ActorHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished() && !self.status.borrow().is_terminal()
    }
}

/// Registry of per-alarm execution actors. An entry exists from the moment
/// a trigger fires until the engine reaps the finished execution.
pub struct ExecutionSupervisor {
    motion: MotionEngine,
    recorder: Arc<ExecutionRecorder>,
    events: EventBus,
    supervision_timeout: Duration,
    actors: Mutex<HashMap<String, ActorHandle>>,
    finished_tx: mpsc::UnboundedSender<FinishedExecution>,
}

impl ExecutionSupervisor {
    pub fn new(
        motion: MotionEngine,
        recorder: Arc<ExecutionRecorder>,
        events: EventBus,
        supervision_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<FinishedExecution>) {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        (
            Self {
                motion,
                recorder,
                events,
                supervision_timeout,
                actors: Mutex::new(HashMap::new()),
                finished_tx,
            },
            finished_rx,
        )
    }

    /// Fire `execution` and hand it to a new actor. Fails if the alarm
    /// already has a live execution.
    pub async fn begin(
        &self,
        alarm: &AlarmDefinition,
        execution: AlarmExecution,
        fired_at: DateTime<Utc>,
    ) -> AlarmResult<ExecutionStatus> {
        let running = self
            .actors()
            .get(&alarm.id)
            .filter(|handle| handle.is_live())
            .map(|handle| handle.execution_id.clone());
        if let Some(execution_id) = running {
            return Err(AlarmError::schedule_conflict(
                &alarm.id,
                format!("execution {execution_id} is still running"),
            ));
        }

        let (status_tx, status_rx) = watch::channel(execution.status);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let mut actor = ExecutionActor::new(
            alarm.clone(),
            execution,
            self.motion.clone(),
            self.recorder.clone(),
            self.events.clone(),
            self.supervision_timeout,
            status_tx,
            self.finished_tx.clone(),
        );
        actor.fire(fired_at).await;
        let execution_id = actor.execution_id().to_string();
        let status = *status_rx.borrow();

        let task = tokio::spawn(actor.run(commands_rx));
        self.actors().insert(
            alarm.id.clone(),
            ActorHandle {
                execution_id,
                commands: commands_tx,
                status: status_rx,
                task,
            },
        );
        Ok(status)
    }

    /// Ask the live execution to stop. `None` when nothing is running.
    pub async fn stop(&self, alarm_id: &str) -> Option<ExecutionStatus> {
        self.send(alarm_id, Command::Stop).await
    }

    pub async fn snooze(&self, alarm_id: &str) -> Option<ExecutionStatus> {
        self.send(alarm_id, Command::Snooze).await
    }

    /// Mark the live execution missed and wait for its actor to exit, so no
    /// sensor session or snooze timer outlives the call.
    pub async fn cancel(&self, alarm_id: &str) -> Option<ExecutionStatus> {
        let status = self.send(alarm_id, Command::Cancel).await;
        let handle = self.actors().remove(alarm_id);
        if let Some(handle) = handle {
            if handle.task.await.is_err() {
                alarm_debug!(alarm_id, "execution actor ended abnormally");
            }
            alarm_info!(alarm_id, "execution {} cancelled", handle.execution_id);
        }
        status
    }

    pub fn status(&self, alarm_id: &str) -> Option<ExecutionStatus> {
        self.actors()
            .get(alarm_id)
            .filter(|handle| handle.is_live())
            .map(|handle| *handle.status.borrow())
    }

    pub fn is_live(&self, alarm_id: &str) -> bool {
        self.status(alarm_id).is_some()
    }

    /// Drop the registry entry for a finished execution. A newer execution
    /// registered under the same alarm id is left alone.
    pub fn reap(&self, alarm_id: &str, execution_id: &str) {
        let mut actors = self.actors();
        if actors
            .get(alarm_id)
            .map(|handle| handle.execution_id == execution_id)
            .unwrap_or(false)
        {
            actors.remove(alarm_id);
        }
    }

    /// Abort every actor without finalizing; interrupted executions are
    /// recovered as missed on the next start.
    pub fn shutdown(&self) {
        for (alarm_id, handle) in self.actors().drain() {
            handle.task.abort();
            alarm_debug!(alarm_id, "execution {} aborted for shutdown", handle.execution_id);
        }
        self.motion.stop_all();
    }

    async fn send(
        &self,
        alarm_id: &str,
        command: fn(oneshot::Sender<ExecutionStatus>) -> Command,
    ) -> Option<ExecutionStatus> {
        let commands = self
            .actors()
            .get(alarm_id)
            .filter(|handle| handle.is_live())
            .map(|handle| handle.commands.clone())?;

        let (reply_tx, reply_rx) = oneshot::channel();
        commands.send(command(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    fn actors(&self) -> MutexGuard<'_, HashMap<String, ActorHandle>> {
        self.actors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
