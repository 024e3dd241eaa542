use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::AlarmStore;
use crate::db::Database;
use crate::error::AlarmResult;
use crate::models::{AlarmDefinition, AlarmExecution, CompletionStats, MotionSample};

#[async_trait]
impl AlarmStore for Database {
    async fn upsert_alarm(&self, alarm: &AlarmDefinition) -> AlarmResult<()> {
        Ok(Database::upsert_alarm(self, alarm).await?)
    }

    async fn get_alarm(&self, alarm_id: &str) -> AlarmResult<Option<AlarmDefinition>> {
        Ok(Database::get_alarm(self, alarm_id).await?)
    }

    async fn list_alarms(&self, user_id: &str) -> AlarmResult<Vec<AlarmDefinition>> {
        Ok(self.list_alarms_for_user(user_id).await?)
    }

    async fn list_enabled_alarms(&self) -> AlarmResult<Vec<AlarmDefinition>> {
        Ok(Database::list_enabled_alarms(self).await?)
    }

    async fn delete_alarm(&self, alarm_id: &str) -> AlarmResult<bool> {
        Ok(Database::delete_alarm(self, alarm_id).await?)
    }

    async fn record_tombstone(
        &self,
        alarm_id: &str,
        user_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> AlarmResult<()> {
        Ok(Database::record_tombstone(self, alarm_id, user_id, deleted_at).await?)
    }

    async fn list_tombstones(&self, user_id: &str) -> AlarmResult<Vec<String>> {
        Ok(Database::list_tombstones(self, user_id).await?)
    }

    async fn clear_tombstone(&self, alarm_id: &str) -> AlarmResult<()> {
        Ok(Database::clear_tombstone(self, alarm_id).await?)
    }

    async fn save_execution(&self, execution: &AlarmExecution) -> AlarmResult<()> {
        Ok(Database::save_execution(self, execution).await?)
    }

    async fn get_execution(&self, execution_id: &str) -> AlarmResult<Option<AlarmExecution>> {
        Ok(Database::get_execution(self, execution_id).await?)
    }

    async fn active_execution(&self, alarm_id: &str) -> AlarmResult<Option<AlarmExecution>> {
        Ok(self.get_active_execution(alarm_id).await?)
    }

    async fn list_executions(&self, alarm_id: &str) -> AlarmResult<Vec<AlarmExecution>> {
        Ok(self.list_executions_for_alarm(alarm_id).await?)
    }

    async fn list_active_executions(&self) -> AlarmResult<Vec<AlarmExecution>> {
        Ok(Database::list_active_executions(self).await?)
    }

    async fn list_unsynced_executions(&self) -> AlarmResult<Vec<AlarmExecution>> {
        Ok(self.list_unsynced_terminal_executions().await?)
    }

    async fn discard_execution(&self, execution_id: &str) -> AlarmResult<()> {
        Ok(self.delete_execution(execution_id).await?)
    }

    async fn completion_stats(&self, alarm_id: &str) -> AlarmResult<CompletionStats> {
        Ok(Database::completion_stats(self, alarm_id).await?)
    }

    async fn insert_motion_samples(
        &self,
        execution_id: &str,
        samples: &[MotionSample],
    ) -> AlarmResult<()> {
        Ok(Database::insert_motion_samples(self, execution_id, samples).await?)
    }

    async fn count_motion_samples(&self, execution_id: &str) -> AlarmResult<u64> {
        Ok(Database::count_motion_samples(self, execution_id).await?)
    }

    async fn list_motion_samples(&self, execution_id: &str) -> AlarmResult<Vec<MotionSample>> {
        Ok(Database::list_motion_samples(self, execution_id).await?)
    }
}
