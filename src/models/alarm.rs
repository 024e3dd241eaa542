//! Alarm definition data model.
//!
//! An alarm is either repeating (non-empty `repeat_days`) or one-shot
//! (`specific_date`, or neither meaning "next occurrence of the time").

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{AlarmError, AlarmResult};

/// Set of weekdays an alarm repeats on, stored as a bitmask (Mon = bit 0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepeatDays(u8);

impl RepeatDays {
    pub const NONE: RepeatDays = RepeatDays(0);
    pub const WEEKDAYS: RepeatDays = RepeatDays(0b0001_1111);
    pub const EVERY_DAY: RepeatDays = RepeatDays(0b0111_1111);

    pub fn from_days(days: &[Weekday]) -> Self {
        let mut set = Self::NONE;
        for day in days {
            set.insert(*day);
        }
        set
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::EVERY_DAY.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoozeConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub max_count: u32,
}

impl Default for SnoozeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5 * 60,
            max_count: 3,
        }
    }
}

impl SnoozeConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            interval_secs: 0,
            max_count: 0,
        }
    }

    /// True while another snooze may be granted after `used` snoozes.
    pub fn has_capacity(&self, used: u32) -> bool {
        self.enabled && used < self.max_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundSelection {
    pub sound_id: String,
    pub vibrate: bool,
}

impl Default for SoundSelection {
    fn default() -> Self {
        Self {
            sound_id: "default".into(),
            vibrate: true,
        }
    }
}

/// What the user has to do to dismiss a ringing alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MissionConfig {
    /// Dismissed by an explicit stop only.
    None,
    /// Any sustained movement above the engine threshold.
    #[serde(rename_all = "camelCase")]
    Motion { required_count: u32 },
    /// Vigorous shaking; raises the detection threshold for this alarm.
    #[serde(rename_all = "camelCase")]
    Shake {
        required_count: u32,
        min_magnitude_g: f64,
    },
}

impl Default for MissionConfig {
    fn default() -> Self {
        MissionConfig::Motion { required_count: 3 }
    }
}

impl MissionConfig {
    /// Debounced motion events needed before the alarm counts as defeated.
    pub fn required_motion_count(&self) -> Option<u32> {
        match self {
            MissionConfig::None => None,
            MissionConfig::Motion { required_count } => Some(*required_count),
            MissionConfig::Shake { required_count, .. } => Some(*required_count),
        }
    }

    pub fn threshold_override(&self) -> Option<f64> {
        match self {
            MissionConfig::Shake {
                min_magnitude_g, ..
            } => Some(*min_magnitude_g),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmDefinition {
    pub id: String,
    pub user_id: String,
    pub label: String,
    pub hour: u8,
    pub minute: u8,
    pub specific_date: Option<NaiveDate>,
    pub repeat_days: RepeatDays,
    pub enabled: bool,
    pub snooze: SnoozeConfig,
    pub sound: SoundSelection,
    pub mission: MissionConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlarmDefinition {
    /// Build an enabled alarm with a fresh id and default snooze, sound and mission.
    pub fn new(user_id: impl Into<String>, label: impl Into<String>, hour: u8, minute: u8) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            label: label.into(),
            hour,
            minute,
            specific_date: None,
            repeat_days: RepeatDays::NONE,
            enabled: true,
            snooze: SnoozeConfig::default(),
            sound: SoundSelection::default(),
            mission: MissionConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_repeating(&self) -> bool {
        !self.repeat_days.is_empty()
    }

    pub fn validate(&self) -> AlarmResult<()> {
        if self.id.trim().is_empty() {
            return Err(AlarmError::InvalidDefinition("id must not be empty".into()));
        }
        if self.hour > 23 || self.minute > 59 {
            return Err(AlarmError::InvalidDefinition(format!(
                "time of day {:02}:{:02} is out of range",
                self.hour, self.minute
            )));
        }
        if self.is_repeating() && self.specific_date.is_some() {
            return Err(AlarmError::InvalidDefinition(
                "an alarm cannot both repeat and have a specific date".into(),
            ));
        }
        if self.snooze.enabled && (self.snooze.interval_secs == 0 || self.snooze.max_count == 0) {
            return Err(AlarmError::InvalidDefinition(
                "enabled snooze needs a positive interval and max count".into(),
            ));
        }
        match &self.mission {
            MissionConfig::Motion { required_count } if *required_count == 0 => Err(
                AlarmError::InvalidDefinition("motion mission needs at least one event".into()),
            ),
            MissionConfig::Shake {
                required_count,
                min_magnitude_g,
            } if *required_count == 0 || !(*min_magnitude_g > 0.0) => {
                Err(AlarmError::InvalidDefinition(
                    "shake mission needs a positive count and magnitude".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_days_membership() {
        let days = RepeatDays::from_days(&[Weekday::Mon, Weekday::Wed, Weekday::Fri]);
        assert!(days.contains(Weekday::Wed));
        assert!(!days.contains(Weekday::Thu));
        assert_eq!(days.len(), 3);
        assert_eq!(RepeatDays::from_bits(days.bits()), days);
    }

    #[test]
    fn repeating_alarm_with_specific_date_is_rejected() {
        let mut alarm = AlarmDefinition::new("user-1", "Gym", 6, 30);
        alarm.repeat_days = RepeatDays::WEEKDAYS;
        alarm.specific_date = NaiveDate::from_ymd_opt(2026, 3, 2);

        assert!(matches!(
            alarm.validate(),
            Err(AlarmError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn out_of_range_time_is_rejected() {
        let alarm = AlarmDefinition::new("user-1", "Late", 24, 0);
        assert!(alarm.validate().is_err());
    }

    #[test]
    fn mission_serializes_as_tagged_variant() {
        let mission = MissionConfig::Shake {
            required_count: 5,
            min_magnitude_g: 2.5,
        };
        let json = serde_json::to_string(&mission).unwrap();
        assert!(json.contains("\"kind\":\"shake\""));
        assert!(json.contains("\"requiredCount\":5"));
        let back: MissionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.threshold_override(), Some(2.5));
    }

    #[test]
    fn snooze_capacity_respects_limit_and_flag() {
        let snooze = SnoozeConfig {
            enabled: true,
            interval_secs: 300,
            max_count: 1,
        };
        assert!(snooze.has_capacity(0));
        assert!(!snooze.has_capacity(1));
        assert!(!SnoozeConfig::disabled().has_capacity(0));
    }
}
