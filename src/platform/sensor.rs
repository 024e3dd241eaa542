use std::sync::{Arc, Mutex, MutexGuard};

use log::info;

use crate::error::{AlarmError, AlarmResult};
use crate::models::MotionSample;

pub type SampleCallback = Arc<dyn Fn(MotionSample) + Send + Sync>;

/// Accelerometer/gyroscope feed. Samples may arrive at any rate on any thread.
pub trait MotionSensor: Send + Sync {
    fn start_updates(&self, on_sample: SampleCallback) -> AlarmResult<()>;
    fn stop_updates(&self);
}

struct ChannelSensorState {
    available: bool,
    callback: Option<SampleCallback>,
}

/// Sensor driven by the host: platform code pushes readings with
/// [`ChannelSensor::feed`] and they are forwarded while updates are running.
pub struct ChannelSensor {
    state: Mutex<ChannelSensorState>,
}

impl Default for ChannelSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSensor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelSensorState {
                available: true,
                callback: None,
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn is_running(&self) -> bool {
        self.state().callback.is_some()
    }

    /// Returns false when updates are not running and the sample was dropped.
    pub fn feed(&self, sample: MotionSample) -> bool {
        let callback = self.state().callback.clone();
        match callback {
            Some(callback) => {
                callback(sample);
                true
            }
            None => false,
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelSensorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MotionSensor for ChannelSensor {
    fn start_updates(&self, on_sample: SampleCallback) -> AlarmResult<()> {
        let mut state = self.state();
        if !state.available {
            return Err(AlarmError::SensorUnavailable(
                "motion hardware not available".into(),
            ));
        }
        state.callback = Some(on_sample);
        info!("Motion sensor updates started");
        Ok(())
    }

    fn stop_updates(&self) {
        if self.state().callback.take().is_some() {
            info!("Motion sensor updates stopped");
        }
    }
}
