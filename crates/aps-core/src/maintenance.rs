//! Periodic background sweeps
//!
//! Sweepers hold only a `Weak` reference to their component, so dropping
//! the last `Arc` ends the loop on the next tick.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run `task` against `target` every `every` until `target` is dropped
///
/// The first run happens one full interval after spawning.
pub fn spawn_periodic<T, F>(target: &Arc<T>, every: Duration, name: &'static str, task: F) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    F: Fn(&T) + Send + 'static,
{
    let weak: Weak<T> = Arc::downgrade(target);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(target) = weak.upgrade() else {
                tracing::debug!(sweeper = name, "target dropped, stopping");
                break;
            };
            task(&target);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn runs_every_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(&counter, Duration::from_secs(60), "test", |c| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_target_dropped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(&counter, Duration::from_secs(1), "test", |_| {});
        drop(counter);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
