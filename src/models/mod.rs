pub mod alarm;
pub mod execution;
pub mod motion;

pub use alarm::{AlarmDefinition, MissionConfig, RepeatDays, SnoozeConfig, SoundSelection};
pub use execution::{AlarmExecution, CompletionStats, ExecutionStatus, MotionSummary};
pub use motion::{DeviceOrientation, MotionDetectionEvent, MotionSample, Vector3};
