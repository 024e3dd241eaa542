use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_orientation, to_u64},
};
use crate::models::{MotionSample, Vector3};

impl Database {
    pub async fn insert_motion_samples(
        &self,
        execution_id: &str,
        samples: &[MotionSample],
    ) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let execution_id = execution_id.to_string();
        let records = samples.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO motion_samples (
                        execution_id, timestamp,
                        accel_x, accel_y, accel_z,
                        rotation_x, rotation_y, rotation_z,
                        magnitude, orientation, is_moving
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for sample in &records {
                    stmt.execute(params![
                        execution_id,
                        sample.timestamp.to_rfc3339(),
                        sample.acceleration.x,
                        sample.acceleration.y,
                        sample.acceleration.z,
                        sample.rotation_rate.x,
                        sample.rotation_rate.y,
                        sample.rotation_rate.z,
                        sample.magnitude,
                        sample.orientation.as_str(),
                        sample.is_moving,
                    ])
                    .with_context(|| format!("failed to insert motion sample for {execution_id}"))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn count_motion_samples(&self, execution_id: &str) -> Result<u64> {
        let execution_id = execution_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM motion_samples WHERE execution_id = ?1",
                params![execution_id],
                |row| row.get(0),
            )?;
            to_u64(count, "motion sample count")
        })
        .await
    }

    pub async fn list_motion_samples(&self, execution_id: &str) -> Result<Vec<MotionSample>> {
        let execution_id = execution_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, accel_x, accel_y, accel_z, rotation_x, rotation_y, rotation_z,
                        magnitude, orientation, is_moving
                 FROM motion_samples
                 WHERE execution_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let mut rows = stmt.query(params![execution_id])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                let timestamp: String = row.get(0)?;
                let orientation: String = row.get(8)?;
                samples.push(MotionSample {
                    timestamp: parse_datetime(&timestamp, "timestamp")?,
                    acceleration: Vector3::new(row.get(1)?, row.get(2)?, row.get(3)?),
                    rotation_rate: Vector3::new(row.get(4)?, row.get(5)?, row.get(6)?),
                    magnitude: row.get(7)?,
                    orientation: parse_orientation(&orientation)?,
                    is_moving: row.get(9)?,
                });
            }
            Ok(samples)
        })
        .await
    }
}
