//! Fixed-interval background tick driving the retransmit sweep.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::Result;

/// Periodically invokes a sweep callback until stopped.
///
/// Callback errors are logged and do not stop the ticker.
pub struct RetransmitTicker {
    interval: Duration,
    stop: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetransmitTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the tick task. Subsequent calls while running are no-ops.
    pub fn start<F>(&self, callback: F)
    where
        F: Fn() -> Result<()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let period = self.interval;
        let stop = self.stop.clone();
        *handle = Some(tokio::spawn(async move {
            // First sweep fires one full period from now.
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = callback() {
                            tracing::error!("retransmit sweep failed: {e}");
                        }
                    }
                    _ = stop.notified() => break,
                }
            }
            tracing::debug!("retransmit ticker stopped");
        }));
        tracing::debug!(interval_ms = period.as_millis() as u64, "retransmit ticker started");
    }

    /// Stop the ticker. The in-flight sweep, if any, runs to completion.
    pub fn stop(&self) {
        self.stop.notify_one();
        self.handle.lock().take();
    }
}

impl Drop for RetransmitTicker {
    fn drop(&mut self) {
        self.stop.notify_one();
    }
}
