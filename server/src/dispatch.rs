//! Bounded handler dispatch with an activity board
//!
//! Every dispatch takes a permit from a semaphore shared by all connections
//! and pins an [`Activity`] marker on the board while it runs. A watchdog
//! task reads the board periodically and warns about dispatches running
//! longer than the slow-handler threshold. Slow dispatches are only reported,
//! never cancelled.

use crate::error::PipelineError;
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// What a dispatch slot is busy with
#[derive(Debug, Clone)]
pub struct Activity {
    pub session: u16,
    pub code: u8,
    pub handler: &'static str,
    pub started: Instant,
    reported: bool,
}

pub struct DispatchMonitor {
    permits: Arc<Semaphore>,
    board: Mutex<HashMap<u64, Activity>>,
    next_id: AtomicU64,
    slow_threshold: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DispatchMonitor {
    pub fn new(workers: usize, slow_threshold: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            board: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            slow_threshold,
        }
    }

    /// Waits for a free dispatch slot
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, PipelineError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::PoolClosed)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Pins an activity marker until the returned guard is dropped
    pub fn begin(&self, session: u16, code: u8, handler: &'static str) -> ActivityGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.board).insert(
            id,
            Activity {
                session,
                code,
                handler,
                started: Instant::now(),
                reported: false,
            },
        );
        ActivityGuard { monitor: self, id }
    }

    pub fn active(&self) -> Vec<Activity> {
        lock(&self.board).values().cloned().collect()
    }

    /// Dispatches past the slow threshold not reported before
    ///
    /// Each activity is returned at most once.
    pub fn overdue(&self) -> Vec<Activity> {
        let mut board = lock(&self.board);
        board
            .values_mut()
            .filter(|a| !a.reported && a.started.elapsed() > self.slow_threshold)
            .map(|a| {
                a.reported = true;
                a.clone()
            })
            .collect()
    }

    /// Closes the pool; waiting and future dispatches fail with
    /// [`PipelineError::PoolClosed`]
    pub fn close(&self) {
        self.permits.close();
    }

    fn finish(&self, id: u64) {
        let Some(activity) = lock(&self.board).remove(&id) else {
            return;
        };
        let elapsed = activity.started.elapsed();
        if elapsed > self.slow_threshold && !activity.reported {
            warn!(
                "Slow handler {} for 0x{:02X} on session {} took {:?}",
                activity.handler, activity.code, activity.session, elapsed
            );
        }
    }
}

/// Removes its activity marker from the board when dropped
pub struct ActivityGuard<'a> {
    monitor: &'a DispatchMonitor,
    id: u64,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.monitor.finish(self.id);
    }
}

/// Periodically warns about dispatches still running past the threshold
pub async fn run_watchdog(monitor: Arc<DispatchMonitor>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for activity in monitor.overdue() {
                    warn!(
                        "Handler {} for 0x{:02X} on session {} still running after {:?}",
                        activity.handler,
                        activity.code,
                        activity.session,
                        activity.started.elapsed()
                    );
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
