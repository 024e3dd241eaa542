use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

/// Tuning for the motion evidence engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MotionSettings {
    /// Magnitude (in g) a sample must exceed to count as moving.
    pub threshold_g: f64,
    /// Consecutive moving samples required for one detection event.
    pub debounce_samples: u32,
    /// A gap longer than this between samples breaks the moving streak.
    pub max_sample_gap_ms: u64,
    /// Capacity of the per-execution detection event channel.
    pub event_buffer: usize,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            threshold_g: 1.8,
            debounce_samples: 3,
            max_sample_gap_ms: 500,
            event_buffer: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisionSettings {
    /// How long a triggered phase may ring before the alarm is missed.
    pub timeout_secs: u64,
}

impl Default for SupervisionSettings {
    fn default() -> Self {
        Self { timeout_secs: 600 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingSettings {
    pub max_samples_per_execution: u32,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            max_samples_per_execution: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub jitter_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
            jitter_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub motion: MotionSettings,
    pub supervision: SupervisionSettings,
    pub recording: RecordingSettings,
    pub sync: SyncSettings,
}

impl EngineSettings {
    /// Apply environment overrides. `WAKEPROOF_DEBUG=1` shortens the
    /// supervision timeout so missed alarms surface quickly.
    pub fn with_env_overrides(mut self) -> Self {
        if debug_mode() {
            self.supervision.timeout_secs = self.supervision.timeout_secs.min(60);
        }
        self
    }

    pub fn supervision_timeout(&self) -> Duration {
        Duration::from_secs(self.supervision.timeout_secs)
    }
}

pub fn debug_mode() -> bool {
    std::env::var("WAKEPROOF_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// JSON-file backed engine settings.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed settings at {}: {err}; using defaults",
                    path.display()
                );
                EngineSettings::default()
            })
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> EngineSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
