//! Action types for the deterministic state machine.

use crate::{message::OutboundMessage, TimerId};
use fbft_messages::EquivocationEvidence;
use fbft_types::{BlockNum, Hash, ViewId};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Broadcast a message to every committee member.
    Broadcast { message: OutboundMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration, replacing any pending one.
    SetTimer { id: TimerId, duration: Duration },

    // ═══════════════════════════════════════════════════════════════════════
    // Collaborators
    // ═══════════════════════════════════════════════════════════════════════
    /// Ask the block producer for a proposal.
    ///
    /// Answered with `Event::ProposalReady`.
    RequestProposal { block_num: BlockNum, view_id: ViewId },

    /// A block reached commit quorum and is final.
    DeliverBlock {
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        payload: Vec<u8>,
    },

    /// A committee member signed conflicting messages.
    ReportFault { evidence: EquivocationEvidence },

    /// Consecutive view changes at one height crossed the configured threshold.
    ReportLivenessFailure {
        block_num: BlockNum,
        view_id: ViewId,
        consecutive_view_changes: u64,
    },
}

impl Action {
    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SetTimer { .. } => "SetTimer",
            Action::RequestProposal { .. } => "RequestProposal",
            Action::DeliverBlock { .. } => "DeliverBlock",
            Action::ReportFault { .. } => "ReportFault",
            Action::ReportLivenessFailure { .. } => "ReportLivenessFailure",
        }
    }
}
