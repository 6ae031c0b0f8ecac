//! Outbound message types for network communication.

use fbft_messages::{CodecError, FbftMessage, MessageType};
use std::sync::Arc;

/// A signed message the state machine wants sent to the committee.
///
/// The runner handles the actual network I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub message: Arc<FbftMessage>,
}

impl OutboundMessage {
    pub fn new(message: Arc<FbftMessage>) -> Self {
        Self { message }
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type
    }

    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self.message.message_type {
            MessageType::Announce => "Announce",
            MessageType::Prepare => "Prepare",
            MessageType::PrepareAck => "PrepareAck",
            MessageType::Commit => "Commit",
            MessageType::CommitAck => "CommitAck",
            MessageType::ViewChange => "ViewChange",
            MessageType::NewView => "NewView",
        }
    }

    /// Check if this is a vote counted toward a quorum.
    pub fn is_vote(&self) -> bool {
        self.message.message_type.is_vote()
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.message.encode()
    }
}
