use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::connection::Database;

impl Database {
    pub async fn record_tombstone(
        &self,
        alarm_id: &str,
        user_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<()> {
        let alarm_id = alarm_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO alarm_tombstones (alarm_id, user_id, deleted_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(alarm_id) DO UPDATE SET deleted_at = excluded.deleted_at",
                params![alarm_id, user_id, deleted_at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_tombstones(&self, user_id: &str) -> Result<Vec<String>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT alarm_id FROM alarm_tombstones WHERE user_id = ?1 ORDER BY deleted_at ASC",
            )?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    pub async fn clear_tombstone(&self, alarm_id: &str) -> Result<()> {
        let alarm_id = alarm_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM alarm_tombstones WHERE alarm_id = ?1",
                params![alarm_id],
            )?;
            Ok(())
        })
        .await
    }
}
