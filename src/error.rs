//! Error types for alarm engine operations.

/// All errors surfaced by the alarm engine.
///
/// Storage-level code works with `anyhow::Result` and is converted into
/// [`AlarmError::StorageFailure`] at the store boundary.
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Motion sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Schedule conflict for alarm {alarm_id}: {reason}")]
    ScheduleConflict { alarm_id: String, reason: String },

    #[error("Storage failure: {0:#}")]
    StorageFailure(#[from] anyhow::Error),

    #[error("Sync failure for {id}: {details}")]
    SyncFailure { id: String, details: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Invalid alarm definition: {0}")]
    InvalidDefinition(String),
}

impl AlarmError {
    pub fn schedule_conflict(alarm_id: &str, reason: impl Into<String>) -> Self {
        AlarmError::ScheduleConflict {
            alarm_id: alarm_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn sync(id: &str, details: impl std::fmt::Display) -> Self {
        AlarmError::SyncFailure {
            id: id.to_string(),
            details: details.to_string(),
        }
    }
}

pub type AlarmResult<T> = Result<T, AlarmError>;
