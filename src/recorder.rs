//! Execution recorder: persists execution state and motion telemetry as the
//! supervisor progresses, and mirrors finished executions to the cloud.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::AlarmResult;
use crate::models::{AlarmExecution, MotionSample};
use crate::store::{AlarmStore, RemoteMirror};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{alarm_debug, alarm_info, alarm_warn};

pub struct ExecutionRecorder {
    store: Arc<dyn AlarmStore>,
    remote: Arc<dyn RemoteMirror>,
    max_samples_per_execution: u32,
    /// Samples persisted so far, per live execution.
    sample_counts: Mutex<HashMap<String, u32>>,
}

impl ExecutionRecorder {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        remote: Arc<dyn RemoteMirror>,
        max_samples_per_execution: u32,
    ) -> Self {
        Self {
            store,
            remote,
            max_samples_per_execution,
            sample_counts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn record(&self, execution: &AlarmExecution) -> AlarmResult<()> {
        self.store.save_execution(execution).await?;
        alarm_debug!(
            execution.alarm_id,
            "execution {} recorded as {}",
            execution.id,
            execution.status.as_str()
        );
        Ok(())
    }

    pub async fn discard(&self, execution_id: &str) -> AlarmResult<()> {
        self.forget_samples(execution_id);
        self.store.discard_execution(execution_id).await
    }

    /// Persist one motion sample unless the execution already reached its
    /// sample cap. Returns whether the sample was written.
    pub async fn record_motion_sample(
        &self,
        execution: &AlarmExecution,
        sample: &MotionSample,
    ) -> AlarmResult<bool> {
        let known = self.cached_sample_count(&execution.id);
        let written = match known {
            Some(count) => count,
            None => {
                let stored = self.store.count_motion_samples(&execution.id).await?;
                u32::try_from(stored).unwrap_or(u32::MAX)
            }
        };

        if written >= self.max_samples_per_execution {
            self.set_sample_count(&execution.id, written);
            return Ok(false);
        }

        self.store
            .insert_motion_samples(&execution.id, std::slice::from_ref(sample))
            .await?;
        self.set_sample_count(&execution.id, written + 1);
        Ok(true)
    }

    /// Persist a terminal execution and push it to the remote mirror. A remote
    /// failure is logged only; the next reconciliation retries it.
    pub async fn finalize(&self, execution: &AlarmExecution) -> AlarmResult<()> {
        self.forget_samples(&execution.id);
        self.store.save_execution(execution).await?;
        alarm_info!(
            execution.alarm_id,
            "execution {} finished as {} (motion {}, snoozes {})",
            execution.id,
            execution.status.as_str(),
            execution.motion_attempts,
            execution.snooze_count
        );

        if let Err(err) = self.push_remote(execution).await {
            alarm_warn!(
                execution.alarm_id,
                "remote push of execution {} deferred: {err}",
                execution.id
            );
        }
        Ok(())
    }

    /// Push a terminal execution and mark it synced locally.
    pub async fn push_remote(&self, execution: &AlarmExecution) -> AlarmResult<()> {
        self.remote.push_execution(execution).await?;
        let mut synced = execution.clone();
        synced.remote_synced = true;
        self.store.save_execution(&synced).await
    }

    fn cached_sample_count(&self, execution_id: &str) -> Option<u32> {
        self.sample_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(execution_id)
            .copied()
    }

    fn set_sample_count(&self, execution_id: &str, count: u32) {
        self.sample_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(execution_id.to_string(), count);
    }

    fn forget_samples(&self, execution_id: &str) {
        self.sample_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(execution_id);
    }
}
