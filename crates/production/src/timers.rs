//! Timer management for the production runner.
//!
//! Each timer is a tokio task that sleeps and then sends a [`TimerFire`] to the
//! runner's timer channel. Setting a timer replaces any pending one with the
//! same id. A replaced timer may already have queued its fire before it was
//! aborted, so every fire carries the generation it was armed with and the
//! runner passes it through [`TimerManager::accept`] before acting on it.

use fbft_core::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::ViewChange => Event::ViewChangeTimer,
    }
}

/// A timer that went off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFire {
    pub id: TimerId,
    generation: u64,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Manages timers for the production runner.
pub struct TimerManager {
    timers: HashMap<TimerId, PendingTimer>,
    next_generation: u64,
    fire_tx: mpsc::Sender<TimerFire>,
}

impl TimerManager {
    pub fn new(fire_tx: mpsc::Sender<TimerFire>) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            fire_tx,
        }
    }

    /// Set a timer that fires after `duration`, cancelling any pending one
    /// with the same id.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);

        let generation = self.next_generation;
        self.next_generation += 1;

        let fire_tx = self.fire_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, generation, "Timer fired");
            if fire_tx.send(TimerFire { id, generation }).await.is_err() {
                trace!(?id, generation, "Timer fired after runner stopped");
            }
        });

        self.timers.insert(id, PendingTimer { generation, handle });
        debug!(?id, ?duration, generation, "Timer set");
    }

    /// Turn a fire into its event if it belongs to the timer currently armed
    /// for its id. Fires from cancelled or replaced timers yield `None`.
    pub fn accept(&mut self, fire: TimerFire) -> Option<Event> {
        match self.timers.get(&fire.id) {
            Some(pending) if pending.generation == fire.generation => {
                self.timers.remove(&fire.id);
                Some(timer_event(fire.id))
            }
            _ => {
                debug!(id = ?fire.id, generation = fire.generation, "Dropping stale timer fire");
                None
            }
        }
    }

    /// Cancel a timer. No-op if it does not exist or already fired.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(pending) = self.timers.remove(&id) {
            pending.handle.abort();
            trace!(?id, "Timer cancelled");
        }
    }

    /// Cancel all timers. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for (id, pending) in self.timers.drain() {
            pending.handle.abort();
            trace!(?id, "Timer cancelled (shutdown)");
        }
    }

    /// Timers armed and not yet accepted.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
