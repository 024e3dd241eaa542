//! Alarm execution data model.
//!
//! One execution tracks a single firing of an alarm definition through the
//! supervisor state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Scheduled,
    Triggered,
    MotionVerifying,
    Snoozed,
    Completed,
    Missed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Scheduled => "Scheduled",
            ExecutionStatus::Triggered => "Triggered",
            ExecutionStatus::MotionVerifying => "MotionVerifying",
            ExecutionStatus::Snoozed => "Snoozed",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Missed => "Missed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Scheduled" => Some(ExecutionStatus::Scheduled),
            "Triggered" => Some(ExecutionStatus::Triggered),
            "MotionVerifying" => Some(ExecutionStatus::MotionVerifying),
            "Snoozed" => Some(ExecutionStatus::Snoozed),
            "Completed" => Some(ExecutionStatus::Completed),
            "Missed" => Some(ExecutionStatus::Missed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Missed)
    }
}

/// Aggregate of the motion evidence gathered during an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionSummary {
    /// Running mean of per-event confidence, 0.0..=1.0.
    pub confidence: f64,
    pub posture_changes: u32,
}

impl MotionSummary {
    /// Fold one more event into the summary; `events_before` is the number
    /// of events already folded.
    pub fn absorb(&mut self, events_before: u32, confidence: f64, posture_changes: u32) {
        let n = f64::from(events_before);
        self.confidence = (self.confidence * n + confidence) / (n + 1.0);
        self.posture_changes = self.posture_changes.saturating_add(posture_changes);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmExecution {
    pub id: String,
    pub alarm_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub triggered_time: Option<DateTime<Utc>>,
    pub motion_detected_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub motion_attempts: u32,
    pub snooze_count: u32,
    pub motion_data: MotionSummary,
    /// Set once the terminal record has reached the remote mirror.
    pub remote_synced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlarmExecution {
    pub fn scheduled(alarm_id: &str, scheduled_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alarm_id: alarm_id.to_string(),
            scheduled_time,
            triggered_time: None,
            motion_detected_time: None,
            completed_time: None,
            status: ExecutionStatus::Scheduled,
            motion_attempts: 0,
            snooze_count: 0,
            motion_data: MotionSummary::default(),
            remote_synced: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStats {
    pub completed: u32,
    pub missed: u32,
}

impl CompletionStats {
    pub fn completion_rate(&self) -> Option<f64> {
        let total = self.completed + self.missed;
        if total == 0 {
            None
        } else {
            Some(f64::from(self.completed) / f64::from(total))
        }
    }
}
