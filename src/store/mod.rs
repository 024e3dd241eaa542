//! Storage seams for alarm definitions and execution telemetry.
//!
//! `AlarmStore` is the on-device source of truth; `RemoteMirror` is the
//! per-user cloud copy. The engine only talks to these traits so the SQLite
//! database and the in-memory implementations are interchangeable.

mod local;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AlarmResult;
use crate::models::{AlarmDefinition, AlarmExecution, CompletionStats, MotionSample};

pub use memory::{MemoryAlarmStore, MemoryRemoteMirror};

#[async_trait]
pub trait AlarmStore: Send + Sync {
    async fn upsert_alarm(&self, alarm: &AlarmDefinition) -> AlarmResult<()>;
    async fn get_alarm(&self, alarm_id: &str) -> AlarmResult<Option<AlarmDefinition>>;
    async fn list_alarms(&self, user_id: &str) -> AlarmResult<Vec<AlarmDefinition>>;
    async fn list_enabled_alarms(&self) -> AlarmResult<Vec<AlarmDefinition>>;
    /// Returns false when the alarm did not exist.
    async fn delete_alarm(&self, alarm_id: &str) -> AlarmResult<bool>;

    async fn record_tombstone(
        &self,
        alarm_id: &str,
        user_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> AlarmResult<()>;
    async fn list_tombstones(&self, user_id: &str) -> AlarmResult<Vec<String>>;
    async fn clear_tombstone(&self, alarm_id: &str) -> AlarmResult<()>;

    /// Insert or update an execution. A row already in a terminal state is
    /// left untouched, except for flipping its `remote_synced` flag.
    async fn save_execution(&self, execution: &AlarmExecution) -> AlarmResult<()>;
    async fn get_execution(&self, execution_id: &str) -> AlarmResult<Option<AlarmExecution>>;
    async fn active_execution(&self, alarm_id: &str) -> AlarmResult<Option<AlarmExecution>>;
    async fn list_executions(&self, alarm_id: &str) -> AlarmResult<Vec<AlarmExecution>>;
    async fn list_active_executions(&self) -> AlarmResult<Vec<AlarmExecution>>;
    async fn list_unsynced_executions(&self) -> AlarmResult<Vec<AlarmExecution>>;
    /// Discard a non-terminal execution (used when a pending trigger is disarmed).
    async fn discard_execution(&self, execution_id: &str) -> AlarmResult<()>;
    async fn completion_stats(&self, alarm_id: &str) -> AlarmResult<CompletionStats>;

    async fn insert_motion_samples(
        &self,
        execution_id: &str,
        samples: &[MotionSample],
    ) -> AlarmResult<()>;
    async fn count_motion_samples(&self, execution_id: &str) -> AlarmResult<u64>;
    async fn list_motion_samples(&self, execution_id: &str) -> AlarmResult<Vec<MotionSample>>;
}

#[async_trait]
pub trait RemoteMirror: Send + Sync {
    async fn fetch_alarms(&self, user_id: &str) -> AlarmResult<Vec<AlarmDefinition>>;
    async fn upsert_alarm(&self, alarm: &AlarmDefinition) -> AlarmResult<()>;
    async fn delete_alarm(&self, user_id: &str, alarm_id: &str) -> AlarmResult<()>;
    async fn push_execution(&self, execution: &AlarmExecution) -> AlarmResult<()>;
}
