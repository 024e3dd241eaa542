use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_date, to_i64, to_u32, to_u64},
};
use crate::models::{AlarmDefinition, MissionConfig, RepeatDays, SnoozeConfig, SoundSelection};

const ALARM_COLUMNS: &str = "id, user_id, label, hour, minute, specific_date, repeat_days, enabled,
     snooze_enabled, snooze_interval_secs, snooze_max_count, sound_id, vibrate, mission_json,
     created_at, updated_at";

fn row_to_alarm(row: &Row) -> Result<AlarmDefinition> {
    let hour: i64 = row.get("hour")?;
    let minute: i64 = row.get("minute")?;
    let repeat_days: i64 = row.get("repeat_days")?;
    let specific_date: Option<String> = row.get("specific_date")?;
    let snooze_interval: i64 = row.get("snooze_interval_secs")?;
    let snooze_max: i64 = row.get("snooze_max_count")?;
    let mission_json: String = row.get("mission_json")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let mission: MissionConfig =
        serde_json::from_str(&mission_json).context("failed to parse mission_json")?;

    Ok(AlarmDefinition {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        label: row.get("label")?,
        hour: u8::try_from(hour).context("hour out of range")?,
        minute: u8::try_from(minute).context("minute out of range")?,
        specific_date: parse_optional_date(specific_date, "specific_date")?,
        repeat_days: RepeatDays::from_bits(u8::try_from(repeat_days).context("repeat_days out of range")?),
        enabled: row.get("enabled")?,
        snooze: SnoozeConfig {
            enabled: row.get("snooze_enabled")?,
            interval_secs: to_u64(snooze_interval, "snooze_interval_secs")?,
            max_count: to_u32(snooze_max, "snooze_max_count")?,
        },
        sound: SoundSelection {
            sound_id: row.get("sound_id")?,
            vibrate: row.get("vibrate")?,
        },
        mission,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn upsert_alarm(&self, alarm: &AlarmDefinition) -> Result<()> {
        let record = alarm.clone();
        self.execute(move |conn| {
            let mission_json =
                serde_json::to_string(&record.mission).context("failed to serialize mission")?;
            conn.execute(
                "INSERT INTO alarms (id, user_id, label, hour, minute, specific_date, repeat_days, enabled,
                     snooze_enabled, snooze_interval_secs, snooze_max_count, sound_id, vibrate, mission_json,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT(id) DO UPDATE SET
                     user_id = excluded.user_id,
                     label = excluded.label,
                     hour = excluded.hour,
                     minute = excluded.minute,
                     specific_date = excluded.specific_date,
                     repeat_days = excluded.repeat_days,
                     enabled = excluded.enabled,
                     snooze_enabled = excluded.snooze_enabled,
                     snooze_interval_secs = excluded.snooze_interval_secs,
                     snooze_max_count = excluded.snooze_max_count,
                     sound_id = excluded.sound_id,
                     vibrate = excluded.vibrate,
                     mission_json = excluded.mission_json,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.user_id,
                    record.label,
                    i64::from(record.hour),
                    i64::from(record.minute),
                    record
                        .specific_date
                        .map(|date| date.format("%Y-%m-%d").to_string()),
                    i64::from(record.repeat_days.bits()),
                    record.enabled,
                    record.snooze.enabled,
                    to_i64(record.snooze.interval_secs)?,
                    i64::from(record.snooze.max_count),
                    record.sound.sound_id,
                    record.sound.vibrate,
                    mission_json,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to upsert alarm {}", record.id))?;
            Ok(())
        })
        .await
    }

    pub async fn get_alarm(&self, alarm_id: &str) -> Result<Option<AlarmDefinition>> {
        let alarm_id = alarm_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let alarm = stmt
                .query_row(params![alarm_id], |row| Ok(row_to_alarm(row)))
                .optional()?
                .transpose()?;
            Ok(alarm)
        })
        .await
    }

    pub async fn list_alarms_for_user(&self, user_id: &str) -> Result<Vec<AlarmDefinition>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {ALARM_COLUMNS} FROM alarms WHERE user_id = ?1 ORDER BY hour, minute, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id])?;
            let mut alarms = Vec::new();
            while let Some(row) = rows.next()? {
                alarms.push(row_to_alarm(row)?);
            }
            Ok(alarms)
        })
        .await
    }

    pub async fn list_enabled_alarms(&self) -> Result<Vec<AlarmDefinition>> {
        self.execute(|conn| {
            let sql =
                format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE enabled = 1 ORDER BY hour, minute, id");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut alarms = Vec::new();
            while let Some(row) = rows.next()? {
                alarms.push(row_to_alarm(row)?);
            }
            Ok(alarms)
        })
        .await
    }

    /// Returns false when no row matched.
    pub async fn delete_alarm(&self, alarm_id: &str) -> Result<bool> {
        let alarm_id = alarm_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute("DELETE FROM alarms WHERE id = ?1", params![alarm_id])?;
            Ok(rows_affected > 0)
        })
        .await
    }
}
