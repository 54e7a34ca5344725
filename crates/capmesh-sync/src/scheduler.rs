//! The scheduler: periodic rounds plus an on-demand trigger.
//!
//! A single async mutex serializes rounds. The timer skips a tick while a
//! round is still running; an explicit `sync_now` waits for the running
//! round to finish and then runs, so triggers queue instead of producing
//! overlapping rounds against the same peer set.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::coordinator::{RoundReport, SyncCoordinator};

pub struct Scheduler {
    coordinator: Arc<SyncCoordinator>,
    round_lock: Mutex<()>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(coordinator: Arc<SyncCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            round_lock: Mutex::new(()),
            interval,
        }
    }

    /// Run a round now, queueing behind any round already in progress.
    pub async fn sync_now(&self) -> RoundReport {
        let _guard = self.round_lock.lock().await;
        Arc::clone(&self.coordinator).sync_round().await
    }

    /// Spawn the periodic loop. The first round runs after one full
    /// interval; the returned handle aborts the loop when dropped via
    /// `JoinHandle::abort`.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + scheduler.interval;
            let mut ticker = tokio::time::interval_at(start, scheduler.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match scheduler.round_lock.try_lock() {
                    Ok(_guard) => {
                        let report =
                            Arc::clone(&scheduler.coordinator).sync_round().await;
                        debug!(
                            peers = report.peers.len(),
                            ok = report.successes(),
                            "scheduled sync round complete"
                        );
                    }
                    Err(_) => {
                        debug!("sync round already in progress, skipping tick");
                    }
                }
            }
        })
    }
}
