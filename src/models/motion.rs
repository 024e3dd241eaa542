//! Motion sensor data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Share of the gravity vector that must lie on one axis for the device to
/// count as flat (z) or standing (y).
const ORIENTATION_AXIS_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOrientation {
    Flat,
    Standing,
    Tilted,
}

impl DeviceOrientation {
    pub fn classify(acceleration: &Vector3) -> Self {
        let magnitude = acceleration.magnitude();
        if magnitude <= f64::EPSILON {
            return DeviceOrientation::Flat;
        }
        if acceleration.z.abs() / magnitude >= ORIENTATION_AXIS_RATIO {
            DeviceOrientation::Flat
        } else if acceleration.y.abs() / magnitude >= ORIENTATION_AXIS_RATIO {
            DeviceOrientation::Standing
        } else {
            DeviceOrientation::Tilted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceOrientation::Flat => "flat",
            DeviceOrientation::Standing => "standing",
            DeviceOrientation::Tilted => "tilted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "flat" => Some(DeviceOrientation::Flat),
            "standing" => Some(DeviceOrientation::Standing),
            "tilted" => Some(DeviceOrientation::Tilted),
            _ => None,
        }
    }
}

/// A single accelerometer/gyroscope reading. Acceleration is in g.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionSample {
    pub timestamp: DateTime<Utc>,
    pub acceleration: Vector3,
    pub rotation_rate: Vector3,
    pub magnitude: f64,
    pub orientation: DeviceOrientation,
    pub is_moving: bool,
}

impl MotionSample {
    pub fn new(timestamp: DateTime<Utc>, acceleration: Vector3, rotation_rate: Vector3) -> Self {
        Self {
            timestamp,
            magnitude: acceleration.magnitude(),
            orientation: DeviceOrientation::classify(&acceleration),
            acceleration,
            rotation_rate,
            is_moving: false,
        }
    }

    /// Recompute derived fields against `threshold_g`.
    pub fn classify(mut self, threshold_g: f64) -> Self {
        self.magnitude = self.acceleration.magnitude();
        self.orientation = DeviceOrientation::classify(&self.acceleration);
        self.is_moving = self.magnitude > threshold_g;
        self
    }
}

/// Published each time the motion engine confirms a debounced movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionDetectionEvent {
    pub alarm_id: String,
    pub execution_id: String,
    /// Running count of debounced events. The motion engine counts per
    /// sensor session; the supervisor republishes it as the execution's
    /// total across snoozes.
    pub count: u32,
    pub raw_sample: MotionSample,
    pub confidence: f64,
    /// Orientation changes observed since the previous event.
    pub posture_changes: u32,
}
