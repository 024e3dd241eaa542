use chrono::{Datelike, DateTime, Days, LocalResult, NaiveDate, NaiveTime, TimeZone};

use crate::models::AlarmDefinition;

/// Next wall-clock instant at or after `from` at which `alarm` should fire,
/// evaluated in `from`'s time zone.
///
/// - repeating: the earliest matching weekday within the coming week
/// - specific date: that date at the alarm time, `None` once it has passed
/// - neither: today at the alarm time, or tomorrow if that has passed
pub fn next_fire_date<Tz: TimeZone>(
    alarm: &AlarmDefinition,
    from: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let time = NaiveTime::from_hms_opt(u32::from(alarm.hour), u32::from(alarm.minute), 0)?;
    let zone = from.timezone();
    let today = from.date_naive();

    if alarm.is_repeating() {
        return (0..=7u64)
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .filter(|date| alarm.repeat_days.contains(date.weekday()))
            .filter_map(|date| resolve(&zone, date, time))
            .find(|candidate| candidate >= from);
    }

    if let Some(date) = alarm.specific_date {
        return resolve(&zone, date, time).filter(|candidate| candidate >= from);
    }

    (0..=1u64)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|date| resolve(&zone, date, time))
        .find(|candidate| candidate >= from)
}

/// Local date + time to an instant. Ambiguous times (clocks going back) take
/// the earlier instant; nonexistent times (clocks going forward) move one
/// hour later.
fn resolve<Tz: TimeZone>(zone: &Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    let naive = date.and_time(time);
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(instant) => Some(instant),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            zone.from_local_datetime(&shifted).earliest()
        }
    }
}
