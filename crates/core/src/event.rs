//! Event types for the deterministic state machine.

use fbft_messages::FbftMessage;
use fbft_types::{BlockNum, Hash, ViewId};
use std::sync::Arc;

/// Priority levels for event ordering within the same timestamp.
///
/// Lower values = higher priority (processed first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Consequences of prior event processing.
    Internal = 0,

    /// Timers scheduled by the node itself.
    Timer = 1,

    /// Messages from other nodes.
    Network = 2,
}

/// All possible events a consensus node can receive.
///
/// Events are **passive data** - they describe something that happened.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// The current view did not commit in time.
    ViewChangeTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// A parsed message whose signature has already been verified against
    /// the committee.
    MessageReceived { message: Arc<FbftMessage> },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════════
    /// The block producer answered an `Action::RequestProposal`.
    ProposalReady {
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        payload: Vec<u8>,
    },
}

impl Event {
    /// Get the priority for this event type.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::ProposalReady { .. } => EventPriority::Internal,
            Event::ViewChangeTimer => EventPriority::Timer,
            Event::MessageReceived { .. } => EventPriority::Network,
        }
    }

    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ViewChangeTimer => "ViewChangeTimer",
            Event::MessageReceived { .. } => "MessageReceived",
            Event::ProposalReady { .. } => "ProposalReady",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbft_messages::MessageType;
    use fbft_types::ValidatorId;

    #[test]
    fn test_internal_events_come_first() {
        let message = Arc::new(FbftMessage::new(
            MessageType::Prepare,
            BlockNum(1),
            ViewId(0),
            Hash::from_bytes(b"b"),
            ValidatorId(0),
        ));
        let mut events = [
            Event::MessageReceived { message },
            Event::ViewChangeTimer,
            Event::ProposalReady {
                block_num: BlockNum(1),
                view_id: ViewId(0),
                block_hash: Hash::from_bytes(b"b"),
                payload: vec![1],
            },
        ];
        events.sort_by_key(Event::priority);
        assert_eq!(events[0].type_name(), "ProposalReady");
        assert_eq!(events[1].type_name(), "ViewChangeTimer");
        assert_eq!(events[2].type_name(), "MessageReceived");
    }
}
