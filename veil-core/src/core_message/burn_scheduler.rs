//! Background burn sweeps
//!
//! Deadlines are enforced on access by the lifecycle manager; the scheduler
//! exists so display surfaces learn about burns without polling.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::lifecycle::SharedLifecycle;
use crate::types::{ContactId, MessageId};

/// Capacity of the burn event channel
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurnEvent {
    /// Content of `id` was destroyed; remove it from every display surface
    Burned { id: MessageId, contact: ContactId },
}

/// Periodic sweeper over a shared lifecycle manager
pub struct BurnScheduler {
    events: broadcast::Sender<BurnEvent>,
    handle: Option<JoinHandle<()>>,
}

impl BurnScheduler {
    /// Start sweeping every `tick`
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(lifecycle: SharedLifecycle, tick: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sender = events.clone();

        let handle = tokio::spawn(async move {
            Self::run_sweep_loop(lifecycle, tick, sender).await;
        });

        info!(tick_ms = tick.as_millis() as u64, "burn scheduler started");
        Self {
            events,
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BurnEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop sweeping; already-burned messages stay burned
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("burn scheduler stopped");
        }
    }

    async fn run_sweep_loop(
        lifecycle: SharedLifecycle,
        tick: Duration,
        events: broadcast::Sender<BurnEvent>,
    ) {
        let mut tick = interval(tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            let burned = lifecycle.write().await.sweep();
            for (id, contact) in burned {
                // No subscribers is fine; the burn already happened
                if events.send(BurnEvent::Burned { id, contact }).is_err() {
                    debug!(message_id = %id, "burn event had no subscribers");
                }
            }
        }
    }
}

impl Drop for BurnScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
