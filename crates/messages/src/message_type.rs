//! Protocol message types.

use sbor::prelude::BasicSbor;
use std::fmt;

/// The type of an FBFT protocol message.
///
/// The discriminant doubles as the wire tag and as the type byte of the
/// signing digest, so the numbering is part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
pub enum MessageType {
    /// Leader proposes a block for (block num, view).
    Announce,
    /// Replica vote that it accepted the announced block.
    Prepare,
    /// Leader certificate that prepare quorum was reached.
    PrepareAck,
    /// Replica vote to finalize the prepared block.
    Commit,
    /// Leader certificate that commit quorum was reached.
    CommitAck,
    /// Replica vote to abandon the current view.
    ViewChange,
    /// New leader certificate that view change quorum was reached.
    NewView,
}

impl MessageType {
    /// All message types in tag order.
    pub const ALL: [MessageType; 7] = [
        MessageType::Announce,
        MessageType::Prepare,
        MessageType::PrepareAck,
        MessageType::Commit,
        MessageType::CommitAck,
        MessageType::ViewChange,
        MessageType::NewView,
    ];

    /// Wire tag of this type.
    pub fn tag(self) -> u8 {
        match self {
            MessageType::Announce => 0,
            MessageType::Prepare => 1,
            MessageType::PrepareAck => 2,
            MessageType::Commit => 3,
            MessageType::CommitAck => 4,
            MessageType::ViewChange => 5,
            MessageType::NewView => 6,
        }
    }

    /// Resolve a wire tag. Unknown tags return `None`; there is no fallback type.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Topic name used for gossip routing.
    pub fn topic_name(self) -> &'static str {
        match self {
            MessageType::Announce => "fbft.announce",
            MessageType::Prepare => "fbft.prepare",
            MessageType::PrepareAck => "fbft.prepare_ack",
            MessageType::Commit => "fbft.commit",
            MessageType::CommitAck => "fbft.commit_ack",
            MessageType::ViewChange => "fbft.view_change",
            MessageType::NewView => "fbft.new_view",
        }
    }

    /// Whether messages of this type are replica votes counted toward a quorum.
    pub fn is_vote(self) -> bool {
        matches!(
            self,
            MessageType::Prepare | MessageType::Commit | MessageType::ViewChange
        )
    }

    /// Whether only the leader of the round may send this type.
    pub fn is_leader_only(self) -> bool {
        matches!(
            self,
            MessageType::Announce
                | MessageType::PrepareAck
                | MessageType::CommitAck
                | MessageType::NewView
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic_name())
    }
}
