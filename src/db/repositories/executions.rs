use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_status, to_u32},
};
use crate::models::{AlarmExecution, CompletionStats, MotionSummary};

const EXECUTION_COLUMNS: &str = "id, alarm_id, scheduled_time, triggered_time, motion_detected_time,
     completed_time, status, motion_attempts, snooze_count, confidence, posture_changes,
     remote_synced, created_at, updated_at";

fn row_to_execution(row: &Row) -> Result<AlarmExecution> {
    let scheduled_time: String = row.get("scheduled_time")?;
    let triggered_time: Option<String> = row.get("triggered_time")?;
    let motion_detected_time: Option<String> = row.get("motion_detected_time")?;
    let completed_time: Option<String> = row.get("completed_time")?;
    let status: String = row.get("status")?;
    let motion_attempts: i64 = row.get("motion_attempts")?;
    let snooze_count: i64 = row.get("snooze_count")?;
    let posture_changes: i64 = row.get("posture_changes")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(AlarmExecution {
        id: row.get("id")?,
        alarm_id: row.get("alarm_id")?,
        scheduled_time: parse_datetime(&scheduled_time, "scheduled_time")?,
        triggered_time: parse_optional_datetime(triggered_time, "triggered_time")?,
        motion_detected_time: parse_optional_datetime(motion_detected_time, "motion_detected_time")?,
        completed_time: parse_optional_datetime(completed_time, "completed_time")?,
        status: parse_status(&status)?,
        motion_attempts: to_u32(motion_attempts, "motion_attempts")?,
        snooze_count: to_u32(snooze_count, "snooze_count")?,
        motion_data: MotionSummary {
            confidence: row.get("confidence")?,
            posture_changes: to_u32(posture_changes, "posture_changes")?,
        },
        remote_synced: row.get("remote_synced")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn collect_executions(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<AlarmExecution>> {
    let mut executions = Vec::new();
    while let Some(row) = rows.next()? {
        executions.push(row_to_execution(row)?);
    }
    Ok(executions)
}

impl Database {
    /// Insert or overwrite an execution. Terminal rows are never rewritten;
    /// the call succeeds without touching them.
    pub async fn save_execution(&self, execution: &AlarmExecution) -> Result<()> {
        let record = execution.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO executions (id, alarm_id, scheduled_time, triggered_time, motion_detected_time,
                     completed_time, status, motion_attempts, snooze_count, confidence, posture_changes,
                     remote_synced, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     triggered_time = excluded.triggered_time,
                     motion_detected_time = excluded.motion_detected_time,
                     completed_time = excluded.completed_time,
                     status = excluded.status,
                     motion_attempts = excluded.motion_attempts,
                     snooze_count = excluded.snooze_count,
                     confidence = excluded.confidence,
                     posture_changes = excluded.posture_changes,
                     remote_synced = excluded.remote_synced,
                     updated_at = excluded.updated_at
                 WHERE executions.status NOT IN ('Completed', 'Missed')
                    OR (executions.status = excluded.status AND excluded.remote_synced = 1)",
                params![
                    record.id,
                    record.alarm_id,
                    record.scheduled_time.to_rfc3339(),
                    record.triggered_time.map(|dt| dt.to_rfc3339()),
                    record.motion_detected_time.map(|dt| dt.to_rfc3339()),
                    record.completed_time.map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    i64::from(record.motion_attempts),
                    i64::from(record.snooze_count),
                    record.motion_data.confidence,
                    i64::from(record.motion_data.posture_changes),
                    record.remote_synced,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to save execution {}", record.id))?;
            Ok(())
        })
        .await
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<AlarmExecution>> {
        let execution_id = execution_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let execution = stmt
                .query_row(params![execution_id], |row| Ok(row_to_execution(row)))
                .optional()?
                .transpose()?;
            Ok(execution)
        })
        .await
    }

    pub async fn get_active_execution(&self, alarm_id: &str) -> Result<Option<AlarmExecution>> {
        let alarm_id = alarm_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions
                 WHERE alarm_id = ?1 AND status NOT IN ('Completed', 'Missed')
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let execution = stmt
                .query_row(params![alarm_id], |row| Ok(row_to_execution(row)))
                .optional()?
                .transpose()?;
            Ok(execution)
        })
        .await
    }

    pub async fn list_executions_for_alarm(&self, alarm_id: &str) -> Result<Vec<AlarmExecution>> {
        let alarm_id = alarm_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions
                 WHERE alarm_id = ?1
                 ORDER BY scheduled_time DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![alarm_id])?;
            collect_executions(&mut rows)
        })
        .await
    }

    pub async fn list_active_executions(&self) -> Result<Vec<AlarmExecution>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions
                 WHERE status NOT IN ('Completed', 'Missed')
                 ORDER BY scheduled_time ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            collect_executions(&mut rows)
        })
        .await
    }

    pub async fn list_unsynced_terminal_executions(&self) -> Result<Vec<AlarmExecution>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions
                 WHERE status IN ('Completed', 'Missed') AND remote_synced = 0
                 ORDER BY completed_time ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            collect_executions(&mut rows)
        })
        .await
    }

    pub async fn delete_execution(&self, execution_id: &str) -> Result<()> {
        let execution_id = execution_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM executions WHERE id = ?1 AND status NOT IN ('Completed', 'Missed')",
                params![execution_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn completion_stats(&self, alarm_id: &str) -> Result<CompletionStats> {
        let alarm_id = alarm_id.to_string();
        self.execute(move |conn| {
            let (completed, missed): (i64, i64) = conn.query_row(
                "SELECT
                     COALESCE(SUM(CASE WHEN status = 'Completed' THEN 1 ELSE 0 END), 0),
                     COALESCE(SUM(CASE WHEN status = 'Missed' THEN 1 ELSE 0 END), 0)
                 FROM executions
                 WHERE alarm_id = ?1",
                params![alarm_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(CompletionStats {
                completed: to_u32(completed, "completed")?,
                missed: to_u32(missed, "missed")?,
            })
        })
        .await
    }
}
