//! Collaborator seams for the host platform: the wake-trigger subsystem and
//! the motion sensor. Each comes with an in-process implementation that the
//! host can drive directly.

pub mod sensor;
pub mod trigger;

pub use sensor::{ChannelSensor, MotionSensor, SampleCallback};
pub use trigger::{TokioWakeTrigger, TriggerFired, TriggerHandle, TriggerPayload, WakeTriggerApi};
