mod common;

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use common::{motion_alarm, shake, snooze_limit, Harness};
use proptest::prelude::*;
use wakeproof::models::{ExecutionStatus, RepeatDays};
use wakeproof::store::AlarmStore;
use wakeproof::AlarmError;

#[derive(Debug, Clone)]
enum Op {
    Fire(usize),
    /// A redelivered or early callback, an hour before the armed date.
    StaleFire(usize),
    Stop(usize),
    Snooze(usize),
    Shake,
    Delete(usize),
    Advance(u64),
}

fn op(alarms: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..alarms).prop_map(Op::Fire),
        (0..alarms).prop_map(Op::StaleFire),
        (0..alarms).prop_map(Op::Stop),
        (0..alarms).prop_map(Op::Snooze),
        Just(Op::Shake),
        (0..alarms).prop_map(Op::Delete),
        (1u64..900).prop_map(Op::Advance),
    ]
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn at_most_one_live_execution_and_terminal_states_stick(
        ops in prop::collection::vec(op(2), 1..30),
    ) {
        paused_runtime().block_on(async move {
            let h = Harness::start().await;
            let mut alarm_ids = Vec::new();
            for snooze in [snooze_limit(1, 120), snooze_limit(2, 60)] {
                let mut alarm = motion_alarm(2, snooze);
                alarm.repeat_days = RepeatDays::EVERY_DAY;
                h.engine.schedule_alarm(alarm.clone()).await.unwrap();
                alarm_ids.push(alarm.id);
            }

            let mut finished: HashMap<String, ExecutionStatus> = HashMap::new();

            for op in &ops {
                // Errors (conflicts, unknown ids after delete) are expected here;
                // only the invariants matter.
                match op {
                    Op::Fire(i) => {
                        let fired_at = h.engine.next_fire_date(&alarm_ids[*i]).unwrap_or_else(Utc::now);
                        let _ = h.engine.handle_trigger_fired(&alarm_ids[*i], fired_at).await;
                    }
                    Op::StaleFire(i) => {
                        let armed_for = h.engine.next_fire_date(&alarm_ids[*i]);
                        let fired_at = armed_for.unwrap_or_else(Utc::now) - chrono::Duration::hours(1);
                        let result = h.engine.handle_trigger_fired(&alarm_ids[*i], fired_at).await;
                        assert!(
                            matches!(result, Ok(None) | Err(AlarmError::EntityNotFound(_))),
                            "stale trigger was acted on: {result:?}"
                        );
                        if let Some(armed_for) = armed_for {
                            assert_eq!(h.engine.next_fire_date(&alarm_ids[*i]), Some(armed_for));
                        }
                    }
                    Op::Stop(i) => {
                        let _ = h.engine.stop_alarm(&alarm_ids[*i]).await;
                    }
                    Op::Snooze(i) => {
                        let _ = h.engine.snooze_alarm(&alarm_ids[*i]).await;
                    }
                    Op::Shake => shake(&h.sensor, 1),
                    Op::Delete(i) => {
                        let _ = h.engine.cancel_alarm(&alarm_ids[*i]).await;
                    }
                    Op::Advance(secs) => tokio::time::sleep(Duration::from_secs(*secs)).await,
                }
                tokio::time::sleep(Duration::from_millis(5)).await;

                for alarm_id in &alarm_ids {
                    let executions = h.store.list_executions(alarm_id).await.unwrap();
                    let live = executions
                        .iter()
                        .filter(|execution| !execution.status.is_terminal())
                        .count();
                    assert!(live <= 1, "alarm {alarm_id} has {live} live executions");

                    for execution in &executions {
                        if let Some(previous) = finished.get(&execution.id) {
                            assert_eq!(*previous, execution.status, "terminal state changed");
                        } else if execution.status.is_terminal() {
                            finished.insert(execution.id.clone(), execution.status);
                        }
                    }
                }
            }

            h.engine.shutdown().await;
        });
    }
}
