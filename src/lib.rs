//! Alarm execution and motion-verified wake engine.
//!
//! An alarm fires through a platform wake trigger, then keeps ringing until
//! the motion sensor shows sustained movement, the user stops it, or the
//! supervision timeout marks it missed. Alarm definitions live in a local
//! SQLite store that is reconciled with a per-user remote mirror.

pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod locks;
pub mod models;
pub mod motion;
pub mod platform;
pub mod recorder;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod supervisor;
pub mod sync;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

pub use db::Database;
pub use engine::{AlarmEngine, EngineDeps, RecoveryReport};
pub use error::{AlarmError, AlarmResult};
pub use events::{AlarmStateStream, EventBus, ExecutionStateChanged};
pub use models::{
    AlarmDefinition, AlarmExecution, CompletionStats, ExecutionStatus, MissionConfig,
    MotionDetectionEvent, MotionSample, RepeatDays, SnoozeConfig, SoundSelection, Vector3,
};
pub use platform::{ChannelSensor, MotionSensor, TokioWakeTrigger, WakeTriggerApi};
pub use settings::{EngineSettings, SettingsStore};
pub use store::{AlarmStore, RemoteMirror};
pub use supervisor::AlarmStatusView;
pub use sync::SyncReport;
pub use utils::logging::init_logging;

const DATABASE_FILE: &str = "wakeproof.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

/// Open the on-device store and settings under `data_dir` and start the
/// engine on top of them. Executions interrupted by a crash are finalized
/// as missed during start-up.
pub async fn start_local_engine(
    data_dir: &Path,
    remote: Arc<dyn RemoteMirror>,
    trigger: Arc<dyn WakeTriggerApi>,
    sensor: Arc<dyn MotionSensor>,
) -> AlarmResult<(AlarmEngine, SettingsStore)> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let database = Database::new(data_dir.join(DATABASE_FILE))?;
    let settings_store = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
    let settings = settings_store.current().with_env_overrides();

    let engine = AlarmEngine::start(EngineDeps {
        store: Arc::new(database),
        remote,
        trigger,
        sensor,
        settings,
    })
    .await?;

    Ok((engine, settings_store))
}
