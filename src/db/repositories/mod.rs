pub mod alarms;
pub mod executions;
pub mod motion_samples;
pub mod tombstones;
