//! Deterministic event ordering.

use crate::NodeIndex;
use fbft_core::{Event, EventPriority};
use std::time::Duration;

/// Key for the simulation event queue.
///
/// Events are ordered by time first, then priority (internal events before
/// timers before network messages at the same instant), then node, then the
/// order they were scheduled in. The sequence number makes every key unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub node_index: NodeIndex,
    pub sequence: u64,
}

impl EventKey {
    pub fn new(time: Duration, event: &Event, node_index: NodeIndex, sequence: u64) -> Self {
        Self {
            time,
            priority: event.priority(),
            node_index,
            sequence,
        }
    }
}
