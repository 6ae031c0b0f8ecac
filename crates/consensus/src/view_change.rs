//! View change component for liveness.
//!
//! Tracks timeout growth across consecutive view changes at one height and
//! the view being voted for. A view change vote carries the block the voter
//! prepared (if any), so that the next leader re-proposes the highest prepared
//! block instead of forking away from it.

use crate::{ConsensusConfig, FbftLog, QuorumDecider};
use fbft_messages::{FbftMessage, MessageType, QuorumProof};
use fbft_types::{BlockNum, Hash, ViewId};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A block that reached prepare quorum, with the proof and body needed to
/// re-propose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBlock {
    pub proof: QuorumProof,
    pub payload: Vec<u8>,
}

impl PreparedBlock {
    pub fn block_hash(&self) -> Hash {
        self.proof.block_hash
    }

    pub fn view_id(&self) -> ViewId {
        self.proof.view_id
    }
}

/// Outcome of starting a view change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewChangeStarted {
    /// View being voted for.
    pub target: ViewId,
    /// Consecutive view changes at this height, including this one.
    pub consecutive: u64,
    /// Whether this view change crossed the liveness failure threshold.
    pub liveness_failure: bool,
}

/// View change bookkeeping for one consensus instance.
#[derive(Debug, Clone)]
pub struct ViewChangeState {
    base_timeout: Duration,
    timeout_increment: Duration,
    max_timeout: Duration,
    liveness_failure_threshold: u64,

    /// View change attempts since the last commit.
    consecutive_view_changes: u64,

    /// View being voted for while a view change is in progress.
    target: Option<ViewId>,
}

impl ViewChangeState {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            base_timeout: config.view_change_timeout,
            timeout_increment: config.view_change_timeout_increment,
            max_timeout: config.max_view_change_timeout,
            liveness_failure_threshold: config.liveness_failure_threshold,
            consecutive_view_changes: 0,
            target: None,
        }
    }

    /// Timeout for the current view: grows linearly with consecutive view
    /// changes, capped at the configured maximum.
    pub fn current_timeout(&self) -> Duration {
        let factor = u32::try_from(self.consecutive_view_changes).unwrap_or(u32::MAX);
        self.timeout_increment
            .checked_mul(factor)
            .and_then(|growth| self.base_timeout.checked_add(growth))
            .map_or(self.max_timeout, |t| t.min(self.max_timeout))
    }

    pub fn consecutive_view_changes(&self) -> u64 {
        self.consecutive_view_changes
    }

    /// View being voted for, if a view change is in progress.
    pub fn target(&self) -> Option<ViewId> {
        self.target
    }

    pub fn is_changing(&self) -> bool {
        self.target.is_some()
    }

    /// Start (or escalate) a view change away from `current_view`.
    ///
    /// A first timeout targets `current_view + 1`; each further timeout
    /// without reaching a new view targets one view higher.
    pub fn start(&mut self, current_view: ViewId) -> ViewChangeStarted {
        let target = match self.target {
            Some(target) => target.next(),
            None => current_view.next(),
        };
        self.target = Some(target);
        self.consecutive_view_changes += 1;

        let liveness_failure = self.liveness_failure_threshold > 0
            && self.consecutive_view_changes % self.liveness_failure_threshold == 0;

        info!(
            current_view = current_view.0,
            target = target.0,
            consecutive = self.consecutive_view_changes,
            "Starting view change"
        );

        ViewChangeStarted {
            target,
            consecutive: self.consecutive_view_changes,
            liveness_failure,
        }
    }

    /// A new view was adopted; the growth counter keeps running until a commit.
    pub fn on_view_adopted(&mut self, view_id: ViewId) {
        debug!(view_id = view_id.0, "View change completed");
        self.target = None;
    }

    /// Progress made (block committed): reset to the base timeout.
    pub fn reset(&mut self) {
        self.consecutive_view_changes = 0;
        self.target = None;
    }
}

/// Highest view above `current` at `block_num` with a view change quorum.
pub fn highest_view_change_quorum(
    log: &FbftLog,
    decider: &QuorumDecider,
    block_num: BlockNum,
    current: ViewId,
) -> Option<ViewId> {
    log.views_with(MessageType::ViewChange, block_num, current)
        .into_iter()
        .rev()
        .find(|&view| {
            decider.is_quorum_achieved(log, MessageType::ViewChange, block_num, view, &Hash::ZERO)
        })
}

/// Pick the prepared block with the highest view among view change votes,
/// also considering our own.
///
/// Votes whose prepared proof lacks quorum are ignored.
pub fn highest_prepared<'a>(
    decider: &QuorumDecider,
    votes: impl IntoIterator<Item = &'a FbftMessage>,
    own: Option<&PreparedBlock>,
) -> Option<PreparedBlock> {
    let mut best = own.cloned();
    for vote in votes {
        let Some(proof) = &vote.proof else {
            continue;
        };
        if !decider.is_proof_quorum(proof) {
            warn!(
                sender = ?vote.sender,
                "View change vote carries prepared proof without quorum"
            );
            continue;
        }
        if best.as_ref().is_some_and(|b| b.view_id() >= proof.view_id) {
            continue;
        }
        best = Some(PreparedBlock {
            proof: proof.clone(),
            payload: vote.payload.clone(),
        });
    }
    best
}
