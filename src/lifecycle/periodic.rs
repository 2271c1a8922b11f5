//! Periodic background loops.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Spawn a loop that calls `tick` every `period` until `shutdown` fires.
///
/// The first tick happens one full period after spawning. Returns `None`
/// when called outside a Tokio runtime.
pub fn spawn_periodic<F>(
    task: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) -> Option<JoinHandle<()>>
where
    F: FnMut() + Send + 'static,
{
    let handle = match Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            tracing::warn!(task, "No Tokio runtime available, periodic task not started");
            return None;
        }
    };

    let period = period.max(Duration::from_millis(1));
    Some(handle.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(task, period_ms = period.as_millis() as u64, "Periodic task starting");
        loop {
            tokio::select! {
                _ = ticker.tick() => tick(),
                _ = shutdown.recv() => {
                    tracing::debug!(task, "Periodic task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_shutdown() {
        let shutdown = Shutdown::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let handle = spawn_periodic("test", Duration::from_millis(100), shutdown.subscribe(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("runtime available");

        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        handle.await.expect("task exits cleanly");

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_outside_runtime_is_none() {
        let shutdown = Shutdown::new();
        assert!(spawn_periodic("test", Duration::from_secs(1), shutdown.subscribe(), || {}).is_none());
    }
}
