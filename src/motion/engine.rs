use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AlarmResult;
use crate::models::{MotionDetectionEvent, MotionSample};
use crate::platform::MotionSensor;
use crate::settings::MotionSettings;

use super::detector::MotionDetector;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{alarm_debug, alarm_info, alarm_warn};

const SAMPLE_FANOUT_CAPACITY: usize = 256;

/// Lazy sequence of detection events for one execution.
///
/// `next()` yields `None` once the engine stops this execution, even if
/// events were still buffered; anything arriving after a stop is discarded.
pub struct MotionStream {
    execution_id: String,
    events: mpsc::Receiver<MotionDetectionEvent>,
    cancel: CancellationToken,
}

impl MotionStream {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub async fn next(&mut self) -> Option<MotionDetectionEvent> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct EngineInner {
    sensor: Arc<dyn MotionSensor>,
    settings: MotionSettings,
    samples: broadcast::Sender<MotionSample>,
    sessions: Mutex<HashMap<String, Session>>,
}

/// Fans one sensor feed out to a debounced detector per running execution.
/// The sensor runs only while at least one execution is being watched.
#[derive(Clone)]
pub struct MotionEngine {
    inner: Arc<EngineInner>,
}

impl MotionEngine {
    pub fn new(sensor: Arc<dyn MotionSensor>, settings: MotionSettings) -> Self {
        let (samples, _) = broadcast::channel(SAMPLE_FANOUT_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                sensor,
                settings,
                samples,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start watching for motion on behalf of `execution_id`. Starting an id
    /// that is already running ends its previous stream first.
    pub fn start(
        &self,
        execution_id: &str,
        alarm_id: &str,
        threshold_override: Option<f64>,
    ) -> AlarmResult<MotionStream> {
        let mut sessions = self.sessions();

        if let Some(previous) = sessions.remove(execution_id) {
            alarm_warn!(alarm_id, "motion engine restarted for execution {execution_id}");
            previous.cancel.cancel();
        }

        if sessions.is_empty() {
            let samples = self.inner.samples.clone();
            self.inner.sensor.start_updates(Arc::new(move |sample| {
                // No receivers just means nobody is listening yet.
                let _ = samples.send(sample);
            }))?;
        }

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(self.inner.settings.event_buffer.max(1));
        let detector = MotionDetector::new(&self.inner.settings, threshold_override);
        let task = tokio::spawn(detection_loop(
            execution_id.to_string(),
            alarm_id.to_string(),
            detector,
            self.inner.samples.subscribe(),
            events_tx,
            cancel.clone(),
        ));

        sessions.insert(
            execution_id.to_string(),
            Session {
                cancel: cancel.clone(),
                task,
            },
        );
        alarm_info!(alarm_id, "motion monitoring started for execution {execution_id}");

        Ok(MotionStream {
            execution_id: execution_id.to_string(),
            events: events_rx,
            cancel,
        })
    }

    /// Stop watching `execution_id`. Unknown ids are ignored.
    pub fn stop(&self, execution_id: &str) {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.remove(execution_id) {
            session.cancel.cancel();
            session.task.abort();
            if sessions.is_empty() {
                self.inner.sensor.stop_updates();
            }
        }
    }

    pub fn stop_all(&self) {
        let mut sessions = self.sessions();
        if sessions.is_empty() {
            return;
        }
        for (_, session) in sessions.drain() {
            session.cancel.cancel();
            session.task.abort();
        }
        self.inner.sensor.stop_updates();
    }

    pub fn is_active(&self, execution_id: &str) -> bool {
        self.sessions().contains_key(execution_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn detection_loop(
    execution_id: String,
    alarm_id: String,
    mut detector: MotionDetector,
    mut samples: broadcast::Receiver<MotionSample>,
    events: mpsc::Sender<MotionDetectionEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = samples.recv() => match received {
                Ok(sample) => {
                    let Some(detection) = detector.process(sample) else {
                        continue;
                    };
                    alarm_debug!(
                        alarm_id,
                        "motion event {} (confidence {:.2})",
                        detection.count,
                        detection.confidence
                    );
                    let event = MotionDetectionEvent {
                        alarm_id: alarm_id.clone(),
                        execution_id: execution_id.clone(),
                        count: detection.count,
                        raw_sample: detection.sample,
                        confidence: detection.confidence,
                        posture_changes: detection.posture_changes,
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    alarm_warn!(alarm_id, "motion detector lagged, {skipped} samples dropped");
                    detector.reset_streak();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    alarm_debug!(alarm_id, "motion detection loop for {execution_id} finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlarmError;
    use crate::models::Vector3;
    use crate::platform::ChannelSensor;
    use chrono::{Duration, Utc};

    fn shake(sensor: &ChannelSensor, samples: usize) {
        let start = Utc::now();
        for i in 0..samples {
            sensor.feed(MotionSample::new(
                start + Duration::milliseconds(i as i64 * 20),
                Vector3::new(1.5, 1.5, 1.0),
                Vector3::default(),
            ));
        }
    }

    #[tokio::test]
    async fn stream_delivers_debounced_events() {
        let sensor = Arc::new(ChannelSensor::new());
        let engine = MotionEngine::new(sensor.clone(), MotionSettings::default());
        let mut stream = engine.start("exec-1", "alarm-1", None).unwrap();
        assert!(sensor.is_running());

        shake(&sensor, 6);
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!((first.count, second.count), (1, 2));
        assert_eq!(first.alarm_id, "alarm-1");
    }

    #[tokio::test]
    async fn stop_ends_stream_and_releases_sensor() {
        let sensor = Arc::new(ChannelSensor::new());
        let engine = MotionEngine::new(sensor.clone(), MotionSettings::default());
        let mut stream = engine.start("exec-1", "alarm-1", None).unwrap();

        engine.stop("exec-1");
        engine.stop("exec-1");
        assert!(!sensor.is_running());
        assert!(stream.next().await.is_none());
        assert!(!sensor.feed(MotionSample::new(Utc::now(), Vector3::default(), Vector3::default())));
    }

    #[tokio::test]
    async fn sensor_keeps_running_while_any_execution_watches() {
        let sensor = Arc::new(ChannelSensor::new());
        let engine = MotionEngine::new(sensor.clone(), MotionSettings::default());
        let _a = engine.start("exec-a", "alarm-a", None).unwrap();
        let _b = engine.start("exec-b", "alarm-b", None).unwrap();

        engine.stop("exec-a");
        assert!(sensor.is_running());
        engine.stop_all();
        assert!(!sensor.is_running());
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_sensor_is_reported() {
        let sensor = Arc::new(ChannelSensor::new());
        sensor.set_available(false);
        let engine = MotionEngine::new(sensor, MotionSettings::default());
        let result = engine.start("exec-1", "alarm-1", None);
        assert!(matches!(result, Err(AlarmError::SensorUnavailable(_))));
        assert!(!engine.is_active("exec-1"));
    }

    #[tokio::test]
    async fn restart_ends_the_previous_stream() {
        let sensor = Arc::new(ChannelSensor::new());
        let engine = MotionEngine::new(sensor.clone(), MotionSettings::default());
        let mut old = engine.start("exec-1", "alarm-1", None).unwrap();
        let mut fresh = engine.start("exec-1", "alarm-1", None).unwrap();

        assert!(old.next().await.is_none());
        shake(&sensor, 3);
        assert_eq!(fresh.next().await.unwrap().count, 1);
    }
}
