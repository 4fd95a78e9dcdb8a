//! System sleep/wake detection
//!
//! The orchestrator only needs two edges: "about to suspend" and "resumed".
//! [`PowerMonitor`] derives them without platform notification APIs: the
//! monotonic clock stops while the machine sleeps but the wall clock keeps
//! going, so a tick whose wall-clock progress exceeds its monotonic progress
//! by more than a threshold marks a sleep/wake cycle. The suspend edge is
//! only observed after the fact, which is harmless because the orchestrator
//! does nothing on suspend except record it. Because both edges arrive
//! together, the orchestrator's asleep state only blocks activation when an
//! embedder feeds real suspend notifications into the power channel.

use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Power state transitions delivered to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// System is about to sleep
    Suspending,
    /// System woke up
    Resumed,
}

/// Time spent suspended between two samples, if it exceeds `threshold`
pub fn suspended_for(
    wall_elapsed: Duration,
    monotonic_elapsed: Duration,
    threshold: Duration,
) -> Option<Duration> {
    let gap = wall_elapsed.checked_sub(monotonic_elapsed)?;
    (gap >= threshold).then_some(gap)
}

/// Background task that reports sleep/wake cycles
pub struct PowerMonitor {
    task: JoinHandle<()>,
}

impl PowerMonitor {
    /// Start sampling the clocks every `tick`
    pub fn spawn(
        tick: Duration,
        threshold: Duration,
        event_tx: mpsc::UnboundedSender<PowerEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut last_wall = SystemTime::now();
            let mut last_mono = Instant::now();
            info!("Power monitor started (tick {:?}, threshold {:?})", tick, threshold);

            loop {
                interval.tick().await;

                let now_wall = SystemTime::now();
                let now_mono = Instant::now();
                let wall_elapsed = now_wall.duration_since(last_wall).unwrap_or_default();
                let mono_elapsed = now_mono.duration_since(last_mono);
                last_wall = now_wall;
                last_mono = now_mono;

                if let Some(asleep) = suspended_for(wall_elapsed, mono_elapsed, threshold) {
                    info!("System woke up after ~{}s asleep", asleep.as_secs());
                    let delivered = event_tx.send(PowerEvent::Suspending).is_ok()
                        && event_tx.send(PowerEvent::Resumed).is_ok();
                    if !delivered {
                        debug!("Power event receiver dropped, stopping power monitor");
                        break;
                    }
                }
            }
        });

        Self { task }
    }

    /// Stop the monitor
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for PowerMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
