use serde::{Deserialize, Serialize};

use crate::models::{AlarmDefinition, ExecutionStatus};

/// Presentation-facing projection of an alarm's state for widgets and
/// live activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmStatusView {
    /// Armed and waiting for its next fire date.
    Scheduled,
    /// Snoozed; counting down to the next ring.
    Countdown,
    /// Disabled by the user.
    Paused,
    /// Ringing and waiting for motion or a stop.
    Alerting,
    /// Enabled but not armed, e.g. arming failed or the one-shot date passed.
    Unknown,
}

impl AlarmStatusView {
    pub fn project(alarm: &AlarmDefinition, live: Option<ExecutionStatus>, armed: bool) -> Self {
        match live {
            Some(ExecutionStatus::Triggered | ExecutionStatus::MotionVerifying) => {
                AlarmStatusView::Alerting
            }
            Some(ExecutionStatus::Snoozed) => AlarmStatusView::Countdown,
            _ if !alarm.enabled => AlarmStatusView::Paused,
            _ if armed => AlarmStatusView::Scheduled,
            _ => AlarmStatusView::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_execution_wins_over_definition_flags() {
        let mut alarm = AlarmDefinition::new("user", "Wake", 7, 0);
        alarm.enabled = false;

        assert_eq!(
            AlarmStatusView::project(&alarm, Some(ExecutionStatus::MotionVerifying), false),
            AlarmStatusView::Alerting
        );
        assert_eq!(
            AlarmStatusView::project(&alarm, Some(ExecutionStatus::Snoozed), false),
            AlarmStatusView::Countdown
        );
        assert_eq!(AlarmStatusView::project(&alarm, None, false), AlarmStatusView::Paused);
    }

    #[test]
    fn idle_alarm_reports_whether_it_is_armed() {
        let alarm = AlarmDefinition::new("user", "Wake", 7, 0);
        assert_eq!(AlarmStatusView::project(&alarm, None, true), AlarmStatusView::Scheduled);
        assert_eq!(AlarmStatusView::project(&alarm, None, false), AlarmStatusView::Unknown);
    }
}
