//! Background sweep of expired windows.
//!
//! Admission never depends on the reaper: expired windows are replaced lazily
//! on their next hit. The reaper only bounds memory held by keys that never
//! come back.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::store::WindowStore;
use super::window::now_millis;

/// Default interval between sweeps.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic sweeper for a [`WindowStore`].
pub struct Reaper;

impl Reaper {
    /// Start sweeping `store` every `interval` on the current tokio runtime.
    ///
    /// The first sweep happens one full interval after spawning.
    pub fn spawn(store: Arc<dyn WindowStore>, interval: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        Self::sweep_now(store.as_ref(), now_millis());
                    }
                }
            }

            debug!("Window reaper stopped");
        });

        info!(interval_secs = interval.as_secs_f64(), "Window reaper started");

        ReaperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Run one sweep immediately. Returns the number of windows removed.
    pub fn sweep_now(store: &dyn WindowStore, now_ms: u64) -> usize {
        let removed = store.sweep(now_ms);
        if removed > 0 {
            debug!(removed, remaining = store.len(), "Swept expired windows");
        }
        removed
    }
}

/// Owns a running reaper task. Dropping the handle aborts the task.
pub struct ReaperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for its task to finish.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
