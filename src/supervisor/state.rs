//! Pure execution state machine.
//!
//! `ExecutionMachine` owns one `AlarmExecution` and decides every transition;
//! it performs no I/O. The actor feeds it events and carries out the
//! returned [`Effect`]s, which keeps the transition rules testable without a
//! runtime.
//!
//! ```text
//! Scheduled -> Triggered -> MotionVerifying -> Completed
//!                  ^               |        \-> Missed
//!                  |               v
//!                  \---------- Snoozed -------> Completed (stop)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{AlarmDefinition, AlarmExecution, ExecutionStatus, MotionDetectionEvent, SnoozeConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Fire { at: DateTime<Utc> },
    /// One debounced detection. Completion is judged on the execution's
    /// cumulative `motion_attempts`, which carries across snoozes.
    Motion {
        execution_id: String,
        confidence: f64,
        posture_changes: u32,
        at: DateTime<Utc>,
    },
    Stop { at: DateTime<Utc> },
    Snooze { at: DateTime<Utc> },
    SnoozeExpired { at: DateTime<Utc> },
    Timeout { at: DateTime<Utc> },
    /// The alarm definition was deleted.
    Cancel { at: DateTime<Utc> },
}

impl SupervisorEvent {
    pub fn motion(event: &MotionDetectionEvent) -> Self {
        SupervisorEvent::Motion {
            execution_id: event.execution_id.clone(),
            confidence: event.confidence,
            posture_changes: event.posture_changes,
            at: event.raw_sample.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartMotion,
    StopMotion,
    StartSnoozeTimer(Duration),
    CancelSnoozeTimer,
    ArmTimeout,
    ClearTimeout,
    Persist,
    Finished,
}

/// Outcome of an accepted event. `path` lists every status entered, in
/// order, so observers see `Triggered` even though the machine moves on to
/// `MotionVerifying` in the same step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub from: ExecutionStatus,
    pub path: Vec<ExecutionStatus>,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone)]
pub struct ExecutionMachine {
    execution: AlarmExecution,
    required_motion: Option<u32>,
    snooze: SnoozeConfig,
}

impl ExecutionMachine {
    pub fn new(alarm: &AlarmDefinition, execution: AlarmExecution) -> Self {
        Self {
            execution,
            required_motion: alarm.mission.required_motion_count(),
            snooze: alarm.snooze.clone(),
        }
    }

    pub fn execution(&self) -> &AlarmExecution {
        &self.execution
    }

    pub fn status(&self) -> ExecutionStatus {
        self.execution.status
    }

    pub fn is_terminal(&self) -> bool {
        self.execution.status.is_terminal()
    }

    /// Apply `event`. Returns `None` when the event does not apply to the
    /// current state; the execution is then left untouched.
    pub fn apply(&mut self, event: SupervisorEvent) -> Option<Step> {
        use ExecutionStatus::*;

        let from = self.execution.status;
        if from.is_terminal() {
            return None;
        }

        let step = match (from, event) {
            (Scheduled, SupervisorEvent::Fire { at }) => {
                self.execution.triggered_time = Some(at);
                self.enter_triggered(from, at)
            }
            (Snoozed, SupervisorEvent::SnoozeExpired { at }) => {
                self.enter_triggered(from, at)
            }
            (
                MotionVerifying,
                SupervisorEvent::Motion {
                    execution_id,
                    confidence,
                    posture_changes,
                    at,
                },
            ) if execution_id == self.execution.id => {
                let before = self.execution.motion_attempts;
                self.execution.motion_attempts = before.saturating_add(1);
                self.execution
                    .motion_data
                    .absorb(before, confidence, posture_changes);
                self.touch(at);

                match self.required_motion {
                    Some(required) if self.execution.motion_attempts >= required => {
                        self.execution.motion_detected_time = Some(at);
                        self.finish(from, Completed, at)
                    }
                    _ => Step {
                        from,
                        path: Vec::new(),
                        effects: vec![Effect::Persist],
                    },
                }
            }
            (Triggered | MotionVerifying, SupervisorEvent::Stop { at }) => {
                self.finish(from, Completed, at)
            }
            (Snoozed, SupervisorEvent::Stop { at }) => self.finish(from, Completed, at),
            (MotionVerifying, SupervisorEvent::Snooze { at }) => {
                if !self.snooze.has_capacity(self.execution.snooze_count) {
                    return None;
                }
                self.snooze_now(from, at)
            }
            (Triggered | MotionVerifying, SupervisorEvent::Timeout { at }) => {
                if self.snooze.has_capacity(self.execution.snooze_count) {
                    self.snooze_now(from, at)
                } else {
                    self.finish(from, Missed, at)
                }
            }
            (_, SupervisorEvent::Cancel { at }) => self.finish(from, Missed, at),
            _ => return None,
        };

        Some(step)
    }

    fn enter_triggered(&mut self, from: ExecutionStatus, at: DateTime<Utc>) -> Step {
        self.execution.status = ExecutionStatus::MotionVerifying;
        self.touch(at);
        let mut effects = Vec::with_capacity(4);
        if self.required_motion.is_some() {
            effects.push(Effect::StartMotion);
        }
        effects.extend([Effect::CancelSnoozeTimer, Effect::ArmTimeout, Effect::Persist]);
        Step {
            from,
            path: vec![ExecutionStatus::Triggered, ExecutionStatus::MotionVerifying],
            effects,
        }
    }

    fn snooze_now(&mut self, from: ExecutionStatus, at: DateTime<Utc>) -> Step {
        self.execution.snooze_count += 1;
        self.execution.status = ExecutionStatus::Snoozed;
        self.touch(at);
        Step {
            from,
            path: vec![ExecutionStatus::Snoozed],
            effects: vec![
                Effect::StopMotion,
                Effect::ClearTimeout,
                Effect::StartSnoozeTimer(Duration::from_secs(self.snooze.interval_secs)),
                Effect::Persist,
            ],
        }
    }

    fn finish(&mut self, from: ExecutionStatus, to: ExecutionStatus, at: DateTime<Utc>) -> Step {
        self.execution.status = to;
        self.execution.completed_time = Some(at);
        self.touch(at);
        Step {
            from,
            path: vec![to],
            effects: vec![
                Effect::StopMotion,
                Effect::CancelSnoozeTimer,
                Effect::ClearTimeout,
                Effect::Persist,
                Effect::Finished,
            ],
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.execution.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MissionConfig;
    use proptest::prelude::*;

    fn alarm(required: u32, snooze: SnoozeConfig) -> AlarmDefinition {
        let mut alarm = AlarmDefinition::new("user", "Test", 7, 0);
        alarm.mission = MissionConfig::Motion {
            required_count: required,
        };
        alarm.snooze = snooze;
        alarm
    }

    fn machine(required: u32, snooze: SnoozeConfig) -> ExecutionMachine {
        let alarm = alarm(required, snooze);
        let execution = AlarmExecution::scheduled(&alarm.id, Utc::now());
        ExecutionMachine::new(&alarm, execution)
    }

    fn motion(machine: &ExecutionMachine) -> SupervisorEvent {
        SupervisorEvent::Motion {
            execution_id: machine.execution().id.clone(),
            confidence: 0.8,
            posture_changes: 0,
            at: Utc::now(),
        }
    }

    #[test]
    fn fire_enters_motion_verifying_through_triggered() {
        let mut m = machine(3, SnoozeConfig::disabled());
        let step = m.apply(SupervisorEvent::Fire { at: Utc::now() }).unwrap();

        assert_eq!(
            step.path,
            vec![ExecutionStatus::Triggered, ExecutionStatus::MotionVerifying]
        );
        assert!(step.effects.contains(&Effect::StartMotion));
        assert!(step.effects.contains(&Effect::ArmTimeout));
        assert!(m.execution().triggered_time.is_some());
    }

    #[test]
    fn required_motion_completes_the_execution() {
        let mut m = machine(3, SnoozeConfig::disabled());
        m.apply(SupervisorEvent::Fire { at: Utc::now() });

        for _ in 0..2 {
            let step = m.apply(motion(&m)).unwrap();
            assert!(step.path.is_empty());
        }
        let step = m.apply(motion(&m)).unwrap();

        assert_eq!(step.path, vec![ExecutionStatus::Completed]);
        assert!(step.effects.contains(&Effect::Finished));
        assert_eq!(m.execution().motion_attempts, 3);
        assert!(m.execution().motion_detected_time.is_some());
    }

    #[test]
    fn motion_for_another_execution_is_ignored() {
        let mut m = machine(1, SnoozeConfig::disabled());
        m.apply(SupervisorEvent::Fire { at: Utc::now() });
        let stale = SupervisorEvent::Motion {
            execution_id: "previous".into(),
            confidence: 1.0,
            posture_changes: 0,
            at: Utc::now(),
        };
        assert!(m.apply(stale).is_none());
        assert_eq!(m.execution().motion_attempts, 0);
    }

    #[test]
    fn motion_before_a_snooze_counts_toward_completion() {
        let snooze = SnoozeConfig {
            enabled: true,
            interval_secs: 300,
            max_count: 1,
        };
        let mut m = machine(3, snooze);
        m.apply(SupervisorEvent::Fire { at: Utc::now() });
        m.apply(motion(&m)).unwrap();
        m.apply(motion(&m)).unwrap();

        m.apply(SupervisorEvent::Snooze { at: Utc::now() }).unwrap();
        assert!(m.apply(motion(&m)).is_none());
        m.apply(SupervisorEvent::SnoozeExpired { at: Utc::now() }).unwrap();

        let step = m.apply(motion(&m)).unwrap();
        assert_eq!(step.path, vec![ExecutionStatus::Completed]);
        assert_eq!(m.execution().motion_attempts, 3);
    }

    #[test]
    fn snooze_respects_the_limit() {
        let snooze = SnoozeConfig {
            enabled: true,
            interval_secs: 300,
            max_count: 1,
        };
        let mut m = machine(3, snooze);
        m.apply(SupervisorEvent::Fire { at: Utc::now() });

        let step = m.apply(SupervisorEvent::Snooze { at: Utc::now() }).unwrap();
        assert!(step
            .effects
            .contains(&Effect::StartSnoozeTimer(Duration::from_secs(300))));
        assert!(m.apply(SupervisorEvent::Snooze { at: Utc::now() }).is_none());

        m.apply(SupervisorEvent::SnoozeExpired { at: Utc::now() }).unwrap();
        assert_eq!(m.status(), ExecutionStatus::MotionVerifying);
        assert!(m.apply(SupervisorEvent::Snooze { at: Utc::now() }).is_none());

        let step = m.apply(SupervisorEvent::Timeout { at: Utc::now() }).unwrap();
        assert_eq!(step.path, vec![ExecutionStatus::Missed]);
        assert_eq!(m.execution().snooze_count, 1);
    }

    #[test]
    fn timeout_with_capacity_snoozes_automatically() {
        let mut m = machine(3, SnoozeConfig::default());
        m.apply(SupervisorEvent::Fire { at: Utc::now() });
        let step = m.apply(SupervisorEvent::Timeout { at: Utc::now() }).unwrap();
        assert_eq!(step.path, vec![ExecutionStatus::Snoozed]);
    }

    #[test]
    fn stop_while_snoozed_completes() {
        let mut m = machine(3, SnoozeConfig::default());
        m.apply(SupervisorEvent::Fire { at: Utc::now() });
        m.apply(SupervisorEvent::Snooze { at: Utc::now() });
        let step = m.apply(SupervisorEvent::Stop { at: Utc::now() }).unwrap();
        assert!(step.effects.contains(&Effect::CancelSnoozeTimer));
        assert_eq!(m.status(), ExecutionStatus::Completed);
    }

    #[test]
    fn commands_after_terminal_are_no_ops() {
        let mut m = machine(3, SnoozeConfig::default());
        m.apply(SupervisorEvent::Fire { at: Utc::now() });
        m.apply(SupervisorEvent::Stop { at: Utc::now() }).unwrap();
        let snapshot = m.execution().clone();

        assert!(m.apply(SupervisorEvent::Stop { at: Utc::now() }).is_none());
        assert!(m.apply(SupervisorEvent::Snooze { at: Utc::now() }).is_none());
        assert!(m.apply(SupervisorEvent::Cancel { at: Utc::now() }).is_none());
        assert_eq!(m.execution(), &snapshot);
    }

    #[test]
    fn mission_without_motion_never_starts_the_sensor() {
        let mut alarm = alarm(1, SnoozeConfig::disabled());
        alarm.mission = MissionConfig::None;
        let mut m = ExecutionMachine::new(&alarm, AlarmExecution::scheduled(&alarm.id, Utc::now()));
        let step = m.apply(SupervisorEvent::Fire { at: Utc::now() }).unwrap();
        assert!(!step.effects.contains(&Effect::StartMotion));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Fire,
        Motion,
        Stop,
        Snooze,
        SnoozeExpired,
        Timeout,
        Cancel,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Fire),
            Just(Op::Motion),
            Just(Op::Stop),
            Just(Op::Snooze),
            Just(Op::SnoozeExpired),
            Just(Op::Timeout),
            Just(Op::Cancel),
        ]
    }

    fn to_event(machine: &ExecutionMachine, op: &Op) -> SupervisorEvent {
        let at = Utc::now();
        match op {
            Op::Fire => SupervisorEvent::Fire { at },
            Op::Motion => SupervisorEvent::Motion {
                execution_id: machine.execution().id.clone(),
                confidence: 0.5,
                posture_changes: 1,
                at,
            },
            Op::Stop => SupervisorEvent::Stop { at },
            Op::Snooze => SupervisorEvent::Snooze { at },
            Op::SnoozeExpired => SupervisorEvent::SnoozeExpired { at },
            Op::Timeout => SupervisorEvent::Timeout { at },
            Op::Cancel => SupervisorEvent::Cancel { at },
        }
    }

    fn allowed(from: ExecutionStatus, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (from, to),
            (Scheduled, Triggered)
                | (Triggered, MotionVerifying)
                | (Snoozed, Triggered)
                | (MotionVerifying | Triggered, Snoozed)
                | (MotionVerifying | Triggered | Snoozed, Completed)
                | (_, Missed)
        )
    }

    proptest! {
        #[test]
        fn transitions_are_monotonic_and_bounded(
            required in 1u32..5,
            max_snoozes in 0u32..3,
            ops in prop::collection::vec(op(), 0..40),
        ) {
            let snooze = if max_snoozes == 0 {
                SnoozeConfig::disabled()
            } else {
                SnoozeConfig { enabled: true, interval_secs: 60, max_count: max_snoozes }
            };
            let mut m = machine(required, snooze);
            let mut terminal: Option<ExecutionStatus> = None;

            for op in &ops {
                let event = to_event(&m, op);
                let before = m.execution().clone();
                match m.apply(event) {
                    Some(step) => {
                        prop_assert!(terminal.is_none(), "transition after terminal state");
                        let mut current = step.from;
                        for next in &step.path {
                            prop_assert!(allowed(current, *next), "{:?} -> {:?}", current, next);
                            current = *next;
                        }
                        prop_assert_eq!(current, m.status());
                        prop_assert!(m.execution().motion_attempts >= before.motion_attempts);
                    }
                    None => prop_assert_eq!(m.execution(), &before),
                }
                prop_assert!(m.execution().snooze_count <= max_snoozes);
                if m.execution().motion_detected_time.is_some() {
                    prop_assert!(m.execution().motion_attempts >= required);
                }
                if m.is_terminal() {
                    prop_assert!(m.execution().completed_time.is_some());
                    if let Some(status) = terminal {
                        prop_assert_eq!(status, m.status());
                    }
                    terminal = Some(m.status());
                }
            }
        }
    }
}
