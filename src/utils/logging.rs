//! Alarm-scoped logging macros gated by a module-level `ENABLE_LOGS` flag.
//!
//! Every line is prefixed with the alarm id so interleaved output from
//! concurrently ringing alarms stays readable.
//!
//! Usage:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{alarm_info, alarm_warn};
//!
//! alarm_info!(alarm_id, "snoozed ({} of {})", used, limit);
//! ```

#[macro_export]
macro_rules! alarm_debug {
    ($alarm_id:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!("[alarm {}] {}", $alarm_id, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! alarm_info {
    ($alarm_id:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("[alarm {}] {}", $alarm_id, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! alarm_warn {
    ($alarm_id:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("[alarm {}] {}", $alarm_id, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! alarm_error {
    ($alarm_id:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!("[alarm {}] {}", $alarm_id, format_args!($($arg)*));
        }
    };
}

/// Initialise `env_logger` from `RUST_LOG`, defaulting to `info`
/// (`debug` under `WAKEPROOF_DEBUG`). Safe to call more than once.
pub fn init_logging() {
    let level = if crate::settings::debug_mode() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}
