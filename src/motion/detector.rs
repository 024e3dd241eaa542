use chrono::{DateTime, Duration, Utc};

use crate::models::{DeviceOrientation, MotionSample};
use crate::settings::MotionSettings;

/// One confirmed movement produced by [`MotionDetector::process`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub count: u32,
    pub sample: MotionSample,
    pub confidence: f64,
    pub posture_changes: u32,
}

/// Threshold + debounce classifier.
///
/// A detection requires `debounce_samples` consecutive moving samples. The
/// streak resets on any sample at or below the threshold, on a sampling gap
/// longer than `max_sample_gap_ms`, and after each detection, so every event
/// is backed by its own run of sustained movement.
#[derive(Debug, Clone)]
pub struct MotionDetector {
    threshold_g: f64,
    debounce_samples: u32,
    max_gap: Duration,

    streak: u32,
    streak_magnitude_sum: f64,
    last_sample_at: Option<DateTime<Utc>>,

    last_orientation: Option<DeviceOrientation>,
    posture_changes: u32,

    count: u32,
}

impl MotionDetector {
    pub fn new(settings: &MotionSettings, threshold_override: Option<f64>) -> Self {
        Self {
            threshold_g: threshold_override.unwrap_or(settings.threshold_g),
            debounce_samples: settings.debounce_samples.max(1),
            max_gap: Duration::milliseconds(settings.max_sample_gap_ms as i64),
            streak: 0,
            streak_magnitude_sum: 0.0,
            last_sample_at: None,
            last_orientation: None,
            posture_changes: 0,
            count: 0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_g
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn process(&mut self, sample: MotionSample) -> Option<Detection> {
        let sample = sample.classify(self.threshold_g);

        if let Some(previous) = self.last_sample_at {
            if sample.timestamp - previous > self.max_gap {
                self.reset_streak();
            }
        }
        self.last_sample_at = Some(sample.timestamp);

        if let Some(previous) = self.last_orientation {
            if previous != sample.orientation {
                self.posture_changes += 1;
            }
        }
        self.last_orientation = Some(sample.orientation);

        if !sample.is_moving {
            self.reset_streak();
            return None;
        }

        self.streak += 1;
        self.streak_magnitude_sum += sample.magnitude;
        if self.streak < self.debounce_samples {
            return None;
        }

        let mean_magnitude = self.streak_magnitude_sum / f64::from(self.streak);
        let confidence = (mean_magnitude / (2.0 * self.threshold_g)).min(1.0);
        self.count += 1;
        let posture_changes = std::mem::take(&mut self.posture_changes);
        self.reset_streak();

        Some(Detection {
            count: self.count,
            sample,
            confidence,
            posture_changes,
        })
    }

    /// Drop the current streak, e.g. after samples were lost.
    pub fn reset_streak(&mut self) {
        self.streak = 0;
        self.streak_magnitude_sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Vector3;

    fn settings() -> MotionSettings {
        MotionSettings {
            threshold_g: 1.8,
            debounce_samples: 3,
            max_sample_gap_ms: 500,
            event_buffer: 8,
        }
    }

    fn sample_at(start: DateTime<Utc>, index: i64, magnitude_z: f64) -> MotionSample {
        MotionSample::new(
            start + Duration::milliseconds(index * 20),
            Vector3::new(0.0, 0.0, magnitude_z),
            Vector3::default(),
        )
    }

    #[test]
    fn k_minus_one_spikes_never_emit() {
        let mut detector = MotionDetector::new(&settings(), None);
        let start = Utc::now();
        let mut events = Vec::new();
        for i in 0..2 {
            events.extend(detector.process(sample_at(start, i, 2.5)));
        }
        for i in 2..20 {
            events.extend(detector.process(sample_at(start, i, 1.0)));
        }
        assert!(events.is_empty());
        assert_eq!(detector.count(), 0);
    }

    #[test]
    fn k_consecutive_samples_emit_exactly_one_event() {
        let mut detector = MotionDetector::new(&settings(), None);
        let start = Utc::now();
        let events: Vec<_> = (0..3)
            .filter_map(|i| detector.process(sample_at(start, i, 2.5)))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].count, 1);
    }

    #[test]
    fn isolated_spikes_between_rest_never_emit() {
        let mut detector = MotionDetector::new(&settings(), None);
        let start = Utc::now();
        for i in 0..30 {
            let magnitude = if i % 2 == 0 { 3.0 } else { 1.0 };
            assert!(detector.process(sample_at(start, i, magnitude)).is_none());
        }
    }

    #[test]
    fn sample_exactly_at_threshold_is_not_moving() {
        let mut detector = MotionDetector::new(&settings(), None);
        let start = Utc::now();
        for i in 0..10 {
            assert!(detector.process(sample_at(start, i, 1.8)).is_none());
        }
    }

    #[test]
    fn sustained_movement_counts_each_debounced_run() {
        let mut detector = MotionDetector::new(&settings(), None);
        let start = Utc::now();
        let events: Vec<_> = (0..9)
            .filter_map(|i| detector.process(sample_at(start, i, 2.5)))
            .collect();
        let counts: Vec<u32> = events.iter().map(|event| event.count).collect();
        assert_eq!(counts, vec![1, 2, 3]);
    }

    #[test]
    fn sampling_gap_breaks_the_streak() {
        let mut detector = MotionDetector::new(&settings(), None);
        let start = Utc::now();
        assert!(detector.process(sample_at(start, 0, 2.5)).is_none());
        assert!(detector.process(sample_at(start, 1, 2.5)).is_none());
        // 2 s later: previous streak is stale.
        assert!(detector.process(sample_at(start, 100, 2.5)).is_none());
        assert!(detector.process(sample_at(start, 101, 2.5)).is_none());
        assert!(detector.process(sample_at(start, 102, 2.5)).is_some());
    }

    #[test]
    fn threshold_override_raises_the_bar() {
        let mut detector = MotionDetector::new(&settings(), Some(3.0));
        let start = Utc::now();
        for i in 0..6 {
            assert!(detector.process(sample_at(start, i, 2.5)).is_none());
        }
        let events: Vec<_> = (6..9)
            .filter_map(|i| detector.process(sample_at(start, i, 3.5)))
            .collect();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn confidence_and_posture_are_reported() {
        let mut detector = MotionDetector::new(&settings(), None);
        let start = Utc::now();
        detector.process(MotionSample::new(start, Vector3::new(0.0, 0.0, 1.0), Vector3::default()));
        let mut detection = None;
        for i in 1..4 {
            let sample = MotionSample::new(
                start + Duration::milliseconds(i * 20),
                Vector3::new(0.0, 3.6, 0.0),
                Vector3::default(),
            );
            detection = detection.or(detector.process(sample));
        }
        let detection = detection.unwrap();
        assert!((detection.confidence - 1.0).abs() < 1e-9);
        assert_eq!(detection.posture_changes, 1);
    }
}
