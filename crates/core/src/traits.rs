//! The state machine seam between consensus logic and its runners.

use crate::{Action, Event};
use std::time::Duration;

/// Consensus logic driven one event at a time.
///
/// Implementations never block, spawn or touch the network. Given the same
/// state, time and event they return the same actions, which is what lets the
/// simulation replay a run exactly and the production runner stay a thin
/// shell around it.
pub trait StateMachine {
    /// Apply one event and return the side effects for the runner to perform.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Advance the clock. Runners call this before every `handle`.
    fn set_time(&mut self, now: Duration);

    fn now(&self) -> Duration;
}
