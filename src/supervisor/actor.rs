use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use crate::events::EventBus;
use crate::models::{AlarmDefinition, AlarmExecution, ExecutionStatus, MotionDetectionEvent};
use crate::motion::{MotionEngine, MotionStream};
use crate::recorder::ExecutionRecorder;

use super::state::{Effect, ExecutionMachine, Step, SupervisorEvent};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{alarm_debug, alarm_error, alarm_info, alarm_warn};

#[derive(Debug)]
pub(crate) enum Command {
    Stop(oneshot::Sender<ExecutionStatus>),
    Snooze(oneshot::Sender<ExecutionStatus>),
    Cancel(oneshot::Sender<ExecutionStatus>),
}

/// Sent once an execution reaches a terminal state.
#[derive(Debug, Clone)]
pub struct FinishedExecution {
    pub alarm_id: String,
    pub execution: AlarmExecution,
}

enum Wake {
    Command(Option<Command>),
    Motion(Option<MotionDetectionEvent>),
    Timeout,
    SnoozeExpired,
}

/// Single owner of one execution. Every input (commands, motion, timers) is
/// funnelled through `run`, so transitions for an alarm never interleave.
pub(crate) struct ExecutionActor {
    alarm: AlarmDefinition,
    machine: ExecutionMachine,
    motion: MotionEngine,
    recorder: Arc<ExecutionRecorder>,
    events: EventBus,
    supervision_timeout: Duration,
    status_tx: watch::Sender<ExecutionStatus>,
    finished_tx: mpsc::UnboundedSender<FinishedExecution>,

    stream: Option<MotionStream>,
    timeout_at: Option<Instant>,
    snooze_at: Option<Instant>,
}

impl ExecutionActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        alarm: AlarmDefinition,
        execution: AlarmExecution,
        motion: MotionEngine,
        recorder: Arc<ExecutionRecorder>,
        events: EventBus,
        supervision_timeout: Duration,
        status_tx: watch::Sender<ExecutionStatus>,
        finished_tx: mpsc::UnboundedSender<FinishedExecution>,
    ) -> Self {
        let machine = ExecutionMachine::new(&alarm, execution);
        Self {
            alarm,
            machine,
            motion,
            recorder,
            events,
            supervision_timeout,
            status_tx,
            finished_tx,
            stream: None,
            timeout_at: None,
            snooze_at: None,
        }
    }

    pub(crate) fn execution_id(&self) -> &str {
        &self.machine.execution().id
    }

    /// Apply the trigger firing before the actor task starts, so callers
    /// observe the ringing state as soon as `begin` returns.
    pub(crate) async fn fire(&mut self, at: chrono::DateTime<Utc>) {
        self.handle(SupervisorEvent::Fire { at }).await;
    }

    pub(crate) async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        while !self.machine.is_terminal() {
            let wake = tokio::select! {
                command = inbox.recv() => Wake::Command(command),
                event = next_motion(&mut self.stream) => Wake::Motion(event),
                _ = deadline(self.timeout_at) => Wake::Timeout,
                _ = deadline(self.snooze_at) => Wake::SnoozeExpired,
            };

            match wake {
                Wake::Command(Some(command)) => self.on_command(command).await,
                Wake::Command(None) => {
                    // Registry dropped without cancelling; treat as shutdown.
                    self.motion.stop(self.execution_id());
                    alarm_warn!(self.alarm.id, "supervisor detached while {}", self.machine.status().as_str());
                    return;
                }
                Wake::Motion(Some(event)) => self.on_motion(event).await,
                Wake::Motion(None) => {
                    self.stream = None;
                }
                Wake::Timeout => {
                    self.timeout_at = None;
                    alarm_info!(self.alarm.id, "supervision timeout elapsed");
                    self.handle(SupervisorEvent::Timeout { at: Utc::now() }).await;
                }
                Wake::SnoozeExpired => {
                    self.snooze_at = None;
                    self.handle(SupervisorEvent::SnoozeExpired { at: Utc::now() })
                        .await;
                }
            }
        }
        self.finish();
    }

    async fn on_command(&mut self, command: Command) {
        let (event, reply, name) = match command {
            Command::Stop(reply) => (SupervisorEvent::Stop { at: Utc::now() }, reply, "stop"),
            Command::Snooze(reply) => (SupervisorEvent::Snooze { at: Utc::now() }, reply, "snooze"),
            Command::Cancel(reply) => (SupervisorEvent::Cancel { at: Utc::now() }, reply, "cancel"),
        };
        if !self.handle(event).await {
            alarm_debug!(
                self.alarm.id,
                "{name} ignored while {}",
                self.machine.status().as_str()
            );
        }
        let _ = reply.send(self.machine.status());
    }

    /// Progress (sample + motion event) goes out before any completion the
    /// event causes, so listeners see "3 of 3" ahead of `Completed`. The
    /// published count is the execution's running total, not the sensor
    /// session's, so progress survives a snooze.
    async fn on_motion(&mut self, mut event: MotionDetectionEvent) {
        let Some(step) = self.machine.apply(SupervisorEvent::motion(&event)) else {
            alarm_debug!(self.alarm.id, "discarded stale motion event {}", event.count);
            return;
        };

        event.count = self.machine.execution().motion_attempts;
        if let Err(err) = self
            .recorder
            .record_motion_sample(self.machine.execution(), &event.raw_sample)
            .await
        {
            alarm_error!(self.alarm.id, "failed to record motion sample: {err}");
        }
        self.events.publish_motion(event);
        self.carry_out(step).await;
    }

    /// Returns whether the event was accepted.
    async fn handle(&mut self, event: SupervisorEvent) -> bool {
        let Some(step) = self.machine.apply(event) else {
            return false;
        };
        self.carry_out(step).await;
        true
    }

    async fn carry_out(&mut self, step: Step) {
        for effect in &step.effects {
            match effect {
                Effect::StartMotion => self.start_motion(),
                Effect::StopMotion => {
                    self.motion.stop(&self.machine.execution().id);
                    self.stream = None;
                }
                Effect::StartSnoozeTimer(interval) => {
                    self.snooze_at = Some(Instant::now() + *interval);
                }
                Effect::CancelSnoozeTimer => self.snooze_at = None,
                Effect::ArmTimeout => {
                    self.timeout_at = Some(Instant::now() + self.supervision_timeout);
                }
                Effect::ClearTimeout => self.timeout_at = None,
                Effect::Persist => self.persist().await,
                Effect::Finished => {}
            }
        }

        let execution = self.machine.execution();
        for status in &step.path {
            alarm_info!(
                self.alarm.id,
                "{} -> {} (execution {})",
                step.from.as_str(),
                status.as_str(),
                execution.id
            );
            self.events.publish_state(execution, *status);
        }
        self.status_tx.send_replace(execution.status);
    }

    fn start_motion(&mut self) {
        let execution_id = self.machine.execution().id.clone();
        match self
            .motion
            .start(&execution_id, &self.alarm.id, self.alarm.mission.threshold_override())
        {
            Ok(stream) => self.stream = Some(stream),
            Err(err) => {
                // Without a sensor only stop or the timeout can end the execution.
                alarm_warn!(self.alarm.id, "motion verification unavailable: {err}");
                self.stream = None;
            }
        }
    }

    async fn persist(&self) {
        let execution = self.machine.execution();
        let result = if execution.status.is_terminal() {
            self.recorder.finalize(execution).await
        } else {
            self.recorder.record(execution).await
        };
        if let Err(err) = result {
            alarm_error!(self.alarm.id, "failed to persist execution {}: {err}", execution.id);
        }
    }

    fn finish(self) {
        let _ = self.finished_tx.send(FinishedExecution {
            alarm_id: self.alarm.id.clone(),
            execution: self.machine.execution().clone(),
        });
    }
}

async fn next_motion(stream: &mut Option<MotionStream>) -> Option<MotionDetectionEvent> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
