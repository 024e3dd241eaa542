use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::settings::SyncSettings;

/// `interval ± jitter`, so devices of the same user do not hit the mirror in
/// lockstep.
pub fn jittered_interval<R: Rng + ?Sized>(settings: &SyncSettings, rng: &mut R) -> Duration {
    let base = settings.interval_secs.max(1);
    let jitter = settings.jitter_secs.min(base - 1);
    if jitter == 0 {
        return Duration::from_secs(base);
    }
    let offset = rng.gen_range(0..=jitter * 2);
    Duration::from_secs(base - jitter + offset)
}

/// Run `pass` every jittered interval until `cancel` fires. The first pass
/// runs after one interval, not immediately.
pub fn spawn_periodic<F, Fut>(
    settings: SyncSettings,
    cancel: CancellationToken,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let delay = jittered_interval(&settings, &mut rand::thread_rng());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            pass().await;
        }
        log::debug!("Periodic sync stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn jitter_stays_within_bounds() {
        let settings = SyncSettings {
            interval_secs: 900,
            jitter_secs: 60,
        };
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let delay = jittered_interval(&settings, &mut rng).as_secs();
            assert!((840..=960).contains(&delay), "delay {delay}");
        }
    }

    #[test]
    fn jitter_never_reaches_zero() {
        let settings = SyncSettings {
            interval_secs: 5,
            jitter_secs: 60,
        };
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            assert!(jittered_interval(&settings, &mut rng) >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_runs_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = runs.clone();
        let task = spawn_periodic(
            SyncSettings {
                interval_secs: 10,
                jitter_secs: 0,
            },
            cancel.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        cancel.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
