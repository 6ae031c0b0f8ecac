//! FBFT consensus state machine.

use crate::view_change::{highest_prepared, highest_view_change_quorum, PreparedBlock};
use crate::{AddOutcome, ConsensusConfig, FbftLog, QuorumDecider, ViewChangeState};
use fbft_core::{Action, Event, OutboundMessage, StateMachine, TimerId};
use fbft_messages::{FbftMessage, MessageBuilder, MessageType, QuorumProof};
use fbft_types::{BlockNum, Committee, Hash, ValidatorId, ViewId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Where the current round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the leader's proposal.
    WaitForAnnounce,
    /// Prepare sent; collecting prepare votes.
    Prepare,
    /// Commit sent; collecting commit votes.
    Commit,
    /// Commit quorum seen; waiting for the block body to deliver it.
    Committed,
    /// Voting to leave the current view.
    ViewChanging,
}

/// Consensus state for one committee member.
///
/// Owns the message log. Every inbound message and timer fire arrives through
/// [`StateMachine::handle`]; after each one the machine re-reads the log and
/// advances as far as the logged messages allow, so messages that arrived
/// early (votes before the proposal, next-block traffic) take effect as soon
/// as their round starts.
pub struct ConsensusState {
    builder: MessageBuilder,
    decider: QuorumDecider,
    config: ConsensusConfig,
    log: FbftLog,
    view_change: ViewChangeState,

    block_num: BlockNum,
    view_id: ViewId,
    phase: Phase,

    /// Block accepted in the current view.
    accepted: Option<Hash>,

    /// Highest block prepared at this height. Locks our prepare votes.
    prepared: Option<PreparedBlock>,

    /// Proposal requested from the block producer and not yet answered.
    pending_proposal: Option<(BlockNum, ViewId)>,

    last_committed: Option<(BlockNum, Hash)>,

    now: Duration,
}

impl ConsensusState {
    /// Create a node that starts consensus at `first_block`.
    pub fn new(
        builder: MessageBuilder,
        committee: Arc<Committee>,
        config: ConsensusConfig,
        first_block: BlockNum,
    ) -> Self {
        let mut decider = QuorumDecider::new(config.quorum_policy, committee);
        if let Some(policy) = config.prepare_policy {
            decider = decider.with_policy_for(MessageType::Prepare, policy);
        }
        let view_change = ViewChangeState::new(&config);

        Self {
            builder,
            decider,
            config,
            log: FbftLog::new(),
            view_change,
            block_num: first_block,
            view_id: ViewId::INITIAL,
            phase: Phase::WaitForAnnounce,
            accepted: None,
            prepared: None,
            pending_proposal: None,
            last_committed: None,
            now: Duration::ZERO,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn validator_id(&self) -> ValidatorId {
        self.builder.sender()
    }

    pub fn committee(&self) -> &Arc<Committee> {
        self.decider.committee()
    }

    pub fn block_num(&self) -> BlockNum {
        self.block_num
    }

    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn log(&self) -> &FbftLog {
        &self.log
    }

    pub fn decider(&self) -> &QuorumDecider {
        &self.decider
    }

    pub fn prepared(&self) -> Option<&PreparedBlock> {
        self.prepared.as_ref()
    }

    pub fn last_committed(&self) -> Option<(BlockNum, Hash)> {
        self.last_committed
    }

    pub fn consecutive_view_changes(&self) -> u64 {
        self.view_change.consecutive_view_changes()
    }

    /// Leader of the current (block, view).
    pub fn leader(&self) -> ValidatorId {
        self.committee().leader_for(self.block_num, self.view_id)
    }

    pub fn is_leader(&self) -> bool {
        self.leader() == self.validator_id()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Entry points
    // ═══════════════════════════════════════════════════════════════════════════

    /// Arm the view change timer and, as leader, ask for the first proposal.
    pub fn start(&mut self) -> Vec<Action> {
        info!(
            validator = ?self.validator_id(),
            block_num = self.block_num.0,
            leader = ?self.leader(),
            "Starting consensus"
        );
        let mut actions = vec![self.view_timer()];
        if self.is_leader() {
            actions.push(self.request_proposal());
        }
        actions.extend(self.drive());
        actions
    }

    fn on_message(&mut self, message: Arc<FbftMessage>) -> Vec<Action> {
        let committee = self.committee();
        if message.shard != committee.shard() || !committee.contains(message.sender) {
            debug!(
                sender = ?message.sender,
                shard = ?message.shard,
                "Dropping message from outside the committee"
            );
            return vec![];
        }

        if message.block_num < self.block_num {
            trace!(
                block_num = message.block_num.0,
                current = self.block_num.0,
                "Dropping stale message"
            );
            return vec![];
        }

        if message.block_num.0 > self.block_num.0.saturating_add(self.config.max_future_blocks) {
            debug!(
                block_num = message.block_num.0,
                current = self.block_num.0,
                "Dropping message too far ahead"
            );
            return vec![];
        }

        if message.message_type.is_leader_only()
            && message.sender != committee.leader_for(message.block_num, message.view_id)
        {
            debug!(
                message_type = %message.message_type,
                sender = ?message.sender,
                "Dropping leader message from non-leader"
            );
            return vec![];
        }

        match self.log.add_message(message.clone()) {
            AddOutcome::Inserted => {}
            AddOutcome::Duplicate => return vec![],
            AddOutcome::Equivocation(evidence) => {
                return vec![Action::ReportFault { evidence }];
            }
        }

        if message.block_num > self.block_num {
            trace!("Logged message for a future block");
            return vec![];
        }
        if message.view_id < self.view_id {
            trace!(current_view = self.view_id.0, "Logged message for an older view");
            return vec![];
        }

        self.drive()
    }

    fn on_proposal_ready(
        &mut self,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        payload: Vec<u8>,
    ) -> Vec<Action> {
        if self.pending_proposal != Some((block_num, view_id)) {
            debug!(
                block_num = block_num.0,
                view_id = view_id.0,
                "Ignoring proposal for a round we no longer lead"
            );
            return vec![];
        }
        self.pending_proposal = None;

        if payload.is_empty() || block_hash.is_zero() {
            warn!(block_num = block_num.0, "Block producer returned an empty proposal");
            return vec![];
        }

        info!(
            block_num = block_num.0,
            view_id = view_id.0,
            block_hash = ?block_hash,
            "Proposing block"
        );
        let announce = self
            .builder
            .announce(block_num, view_id, block_hash, payload);
        let mut actions = self.send(announce);
        actions.extend(self.drive());
        actions
    }

    fn on_view_change_timer(&mut self) -> Vec<Action> {
        if self.phase == Phase::Committed {
            // Decided; only the body is missing. Leaving the view cannot help.
            warn!(
                block_num = self.block_num.0,
                block_hash = ?self.accepted,
                "Still waiting for committed block body"
            );
            return vec![self.view_timer()];
        }

        let started = self.view_change.start(self.view_id);
        self.phase = Phase::ViewChanging;
        self.pending_proposal = None;

        let mut actions = vec![self.view_timer()];
        if started.liveness_failure {
            warn!(
                block_num = self.block_num.0,
                view_id = self.view_id.0,
                consecutive = started.consecutive,
                "Repeated view changes without progress"
            );
            actions.push(Action::ReportLivenessFailure {
                block_num: self.block_num,
                view_id: started.target,
                consecutive_view_changes: started.consecutive,
            });
        }

        let prepared = self
            .prepared
            .clone()
            .map(|p| (p.proof, p.payload));
        let vote = self
            .builder
            .view_change(self.block_num, started.target, prepared);
        actions.extend(self.send(vote));
        actions.extend(self.drive());
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Progress
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance as far as the log allows.
    fn drive(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        loop {
            if self.phase != Phase::Committed {
                if let Some(step) = self.try_adopt_view() {
                    actions.extend(step);
                    continue;
                }
            }

            let step = match self.phase {
                Phase::WaitForAnnounce => match self.try_decide() {
                    Some(step) => Some(step),
                    None => self.try_accept_announce(),
                },
                Phase::Prepare => match self.try_decide() {
                    Some(step) => Some(step),
                    None => self.try_prepare_quorum(),
                },
                Phase::Commit | Phase::ViewChanging => self.try_decide(),
                Phase::Committed => self.try_finalize(),
            };

            match step {
                Some(step) => actions.extend(step),
                None => break,
            }
        }
        actions
    }

    fn try_accept_announce(&mut self) -> Option<Vec<Action>> {
        let leader = self.leader();
        let announce = self
            .log
            .get_messages_by_type_seq_view(MessageType::Announce, self.block_num, self.view_id)
            .into_iter()
            .find(|m| m.sender == leader)?;
        let block_hash = announce.block_hash;
        if !self
            .log
            .has_matching_view_announce(self.block_num, self.view_id, &block_hash)
        {
            return None;
        }

        if let Err(reason) = self.check_lock(&announce) {
            debug!(block_hash = ?block_hash, reason, "Not voting for proposal");
            return None;
        }

        debug!(
            block_num = self.block_num.0,
            view_id = self.view_id.0,
            block_hash = ?block_hash,
            "Accepted proposal"
        );
        self.accepted = Some(block_hash);
        self.phase = Phase::Prepare;
        self.pending_proposal = None;

        let vote = self.builder.prepare(self.block_num, self.view_id, block_hash);
        Some(self.send(vote))
    }

    /// A replica that prepared a block only votes for a different one if the
    /// proposal proves that block was prepared in a view at least as recent.
    fn check_lock(&self, announce: &FbftMessage) -> Result<(), &'static str> {
        if let Some(proof) = &announce.proof {
            if !self.decider.is_proof_quorum(proof) {
                return Err("re-proposal proof lacks quorum");
            }
        }
        let Some(lock) = &self.prepared else {
            return Ok(());
        };
        if lock.block_hash() == announce.block_hash {
            return Ok(());
        }
        match &announce.proof {
            Some(proof) if proof.view_id >= lock.view_id() => Ok(()),
            Some(_) => Err("re-proposal proof is older than our prepared block"),
            None => Err("proposal conflicts with our prepared block"),
        }
    }

    fn try_prepare_quorum(&mut self) -> Option<Vec<Action>> {
        let block_hash = self.accepted?;
        let payload = self.log.get_block(self.block_num, &block_hash)?.to_vec();
        let mut actions = vec![];

        let proof = if self.decider.is_quorum_achieved(
            &self.log,
            MessageType::Prepare,
            self.block_num,
            self.view_id,
            &block_hash,
        ) {
            let proof = self.aggregate(MessageType::Prepare, block_hash)?;
            if self.is_leader() {
                let ack = self.builder.prepare_ack(proof.clone());
                actions.extend(self.send(ack));
            }
            proof
        } else {
            self.leader_proof(MessageType::PrepareAck, &block_hash)?
        };

        info!(
            block_num = self.block_num.0,
            view_id = self.view_id.0,
            block_hash = ?block_hash,
            signers = proof.signers.count(),
            "Prepare quorum reached"
        );
        self.prepared = Some(PreparedBlock { proof, payload });
        self.phase = Phase::Commit;

        let vote = self.builder.commit(self.block_num, self.view_id, block_hash);
        actions.extend(self.send(vote));
        Some(actions)
    }

    /// Commit quorum for any block in the current view, from our own log or a
    /// leader certificate.
    fn try_decide(&mut self) -> Option<Vec<Action>> {
        let (block_hash, own_quorum) = self.decided_block()?;
        if self.accepted.is_some_and(|accepted| accepted != block_hash) {
            error!(
                block_num = self.block_num.0,
                view_id = self.view_id.0,
                accepted = ?self.accepted,
                decided = ?block_hash,
                "Commit quorum for a block other than the one we accepted"
            );
        }

        let mut actions = vec![];
        if own_quorum && self.is_leader() {
            if let Some(proof) = self.aggregate(MessageType::Commit, block_hash) {
                let ack = self.builder.commit_ack(proof);
                actions.extend(self.send(ack));
            }
        }

        info!(
            block_num = self.block_num.0,
            view_id = self.view_id.0,
            block_hash = ?block_hash,
            "Commit quorum reached"
        );
        self.accepted = Some(block_hash);
        self.phase = Phase::Committed;
        Some(actions)
    }

    fn decided_block(&self) -> Option<(Hash, bool)> {
        let mut hashes: Vec<Hash> = self
            .log
            .get_messages_by_type_seq_view(MessageType::Commit, self.block_num, self.view_id)
            .iter()
            .map(|m| m.block_hash)
            .collect();
        hashes.dedup();
        let own = hashes.into_iter().find(|hash| {
            self.decider.is_quorum_achieved(
                &self.log,
                MessageType::Commit,
                self.block_num,
                self.view_id,
                hash,
            )
        });
        if let Some(hash) = own {
            return Some((hash, true));
        }

        let leader = self.leader();
        self.log
            .get_messages_by_type_seq_view(MessageType::CommitAck, self.block_num, self.view_id)
            .into_iter()
            .find(|m| {
                m.sender == leader
                    && m.proof
                        .as_ref()
                        .is_some_and(|p| self.decider.is_proof_quorum(p))
            })
            .map(|m| (m.block_hash, false))
    }

    fn try_finalize(&mut self) -> Option<Vec<Action>> {
        let block_hash = self.accepted?;
        let Some(payload) = self.log.get_block(self.block_num, &block_hash) else {
            trace!(block_hash = ?block_hash, "Committed block body not yet received");
            return None;
        };
        let payload = payload.to_vec();

        info!(
            block_num = self.block_num.0,
            view_id = self.view_id.0,
            block_hash = ?block_hash,
            "Block finalized"
        );
        let mut actions = vec![Action::DeliverBlock {
            block_num: self.block_num,
            view_id: self.view_id,
            block_hash,
            payload,
        }];

        self.last_committed = Some((self.block_num, block_hash));
        self.log.delete_blocks_less_than(self.block_num);
        actions.extend(self.advance_to(self.block_num.next()));
        Some(actions)
    }

    fn advance_to(&mut self, block_num: BlockNum) -> Vec<Action> {
        self.block_num = block_num;
        self.view_id = ViewId::INITIAL;
        self.phase = Phase::WaitForAnnounce;
        self.accepted = None;
        self.prepared = None;
        self.pending_proposal = None;
        self.view_change.reset();

        debug!(block_num = block_num.0, leader = ?self.leader(), "Next block");
        let mut actions = vec![self.view_timer()];
        if self.is_leader() {
            actions.push(self.request_proposal());
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // View change
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move to a higher view once a view change quorum or a valid NewView is logged.
    fn try_adopt_view(&mut self) -> Option<Vec<Action>> {
        let by_quorum =
            highest_view_change_quorum(&self.log, &self.decider, self.block_num, self.view_id);

        let by_new_view = self
            .log
            .views_with(MessageType::NewView, self.block_num, self.view_id)
            .into_iter()
            .rev()
            .find(|&view| {
                let leader = self.committee().leader_for(self.block_num, view);
                self.log
                    .get_messages_by_type_seq_view(MessageType::NewView, self.block_num, view)
                    .iter()
                    .any(|m| {
                        m.sender == leader
                            && m.proof
                                .as_ref()
                                .is_some_and(|p| self.decider.is_proof_quorum(p))
                    })
            });

        let view = by_quorum.max(by_new_view)?;
        Some(self.adopt_view(view))
    }

    fn adopt_view(&mut self, view_id: ViewId) -> Vec<Action> {
        info!(
            block_num = self.block_num.0,
            old_view = self.view_id.0,
            new_view = view_id.0,
            "Adopting new view"
        );
        self.view_id = view_id;
        self.phase = Phase::WaitForAnnounce;
        self.accepted = None;
        self.pending_proposal = None;
        self.view_change.on_view_adopted(view_id);

        let mut actions = vec![self.view_timer()];
        if self.is_leader() {
            actions.extend(self.lead_new_view());
        }
        actions
    }

    /// As the new leader: certify the view change and propose, re-proposing
    /// the highest prepared block reported by the view change votes.
    fn lead_new_view(&mut self) -> Vec<Action> {
        let votes = self.log.get_messages_by_type_seq_view_hash(
            MessageType::ViewChange,
            self.block_num,
            self.view_id,
            &Hash::ZERO,
        );
        let reproposal = highest_prepared(
            &self.decider,
            votes.iter().map(|m| &**m),
            self.prepared.as_ref(),
        );

        let mut actions = vec![];
        match self.aggregate(MessageType::ViewChange, Hash::ZERO) {
            Some(proof) if self.decider.is_proof_quorum(&proof) => {
                let new_view = self.builder.new_view(
                    self.block_num,
                    self.view_id,
                    proof,
                    reproposal
                        .as_ref()
                        .map(|p| (p.block_hash(), p.payload.clone())),
                );
                actions.extend(self.send(new_view));
            }
            _ => warn!(
                view_id = self.view_id.0,
                "Leading a new view without a view change quorum in our log"
            ),
        }

        match reproposal {
            Some(prepared) => {
                info!(
                    block_hash = ?prepared.block_hash(),
                    prepared_view = prepared.view_id().0,
                    "Re-proposing prepared block"
                );
                let announce =
                    self.builder
                        .reproposal(self.view_id, prepared.payload, prepared.proof);
                actions.extend(self.send(announce));
            }
            None => actions.push(self.request_proposal()),
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Log our own message and broadcast it.
    ///
    /// A message that would conflict with one we already sent is never broadcast.
    fn send(&mut self, message: FbftMessage) -> Vec<Action> {
        let message = Arc::new(message);
        match self.log.add_message(message.clone()) {
            AddOutcome::Inserted => {
                trace!(message_type = %message.message_type, "Broadcasting");
                vec![Action::Broadcast {
                    message: OutboundMessage::new(message),
                }]
            }
            outcome => {
                warn!(
                    message_type = %message.message_type,
                    ?outcome,
                    "Own message not logged, not broadcasting"
                );
                vec![]
            }
        }
    }

    fn aggregate(&self, message_type: MessageType, block_hash: Hash) -> Option<QuorumProof> {
        let votes = self.log.get_messages_by_type_seq_view_hash(
            message_type,
            self.block_num,
            self.view_id,
            &block_hash,
        );
        match QuorumProof::aggregate(
            self.committee(),
            message_type,
            self.block_num,
            self.view_id,
            block_hash,
            votes.iter().map(|m| &**m),
        ) {
            Ok(proof) => Some(proof),
            Err(e) => {
                warn!(error = ?e, message_type = %message_type, "Failed to aggregate votes");
                None
            }
        }
    }

    /// Quorum proof from the current leader's certificate of `ack_type`.
    fn leader_proof(&self, ack_type: MessageType, block_hash: &Hash) -> Option<QuorumProof> {
        let leader = self.leader();
        self.log
            .get_messages_by_type_seq_view_hash(ack_type, self.block_num, self.view_id, block_hash)
            .into_iter()
            .find(|m| m.sender == leader)
            .and_then(|m| m.proof.clone())
            .filter(|p| self.decider.is_proof_quorum(p))
    }

    fn request_proposal(&mut self) -> Action {
        self.pending_proposal = Some((self.block_num, self.view_id));
        Action::RequestProposal {
            block_num: self.block_num,
            view_id: self.view_id,
        }
    }

    fn view_timer(&self) -> Action {
        Action::SetTimer {
            id: TimerId::ViewChange,
            duration: self.view_change.current_timeout(),
        }
    }
}

impl StateMachine for ConsensusState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::ViewChangeTimer => self.on_view_change_timer(),
            Event::MessageReceived { message } => self.on_message(message),
            Event::ProposalReady {
                block_num,
                view_id,
                block_hash,
                payload,
            } => self.on_proposal_ready(block_num, view_id, block_hash, payload),
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}

impl std::fmt::Debug for ConsensusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusState")
            .field("validator", &self.validator_id())
            .field("block_num", &self.block_num)
            .field("view_id", &self.view_id)
            .field("phase", &self.phase)
            .field("accepted", &self.accepted)
            .field("log_len", &self.log.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbft_test_helpers::{test_block, TestCommittee};
    use tracing_test::traced_test;

    const NUM: BlockNum = BlockNum(1);

    fn make_node(tc: &TestCommittee, index: usize) -> ConsensusState {
        ConsensusState::new(
            tc.builder(index),
            tc.committee(),
            ConsensusConfig::default(),
            NUM,
        )
    }

    fn deliver(node: &mut ConsensusState, message: FbftMessage) -> Vec<Action> {
        node.handle(Event::MessageReceived {
            message: Arc::new(message),
        })
    }

    fn deliver_all(node: &mut ConsensusState, messages: Vec<FbftMessage>) -> Vec<Action> {
        messages
            .into_iter()
            .flat_map(|m| deliver(node, m))
            .collect()
    }

    fn sent(actions: &[Action]) -> Vec<Arc<FbftMessage>> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast { message } => Some(message.message.clone()),
                _ => None,
            })
            .collect()
    }

    fn sent_types(actions: &[Action]) -> Vec<MessageType> {
        sent(actions).iter().map(|m| m.message_type).collect()
    }

    fn timer_durations(actions: &[Action]) -> Vec<Duration> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::SetTimer { duration, .. } => Some(*duration),
                _ => None,
            })
            .collect()
    }

    fn delivered(actions: &[Action]) -> Option<Hash> {
        actions.iter().find_map(|a| match a {
            Action::DeliverBlock { block_hash, .. } => Some(*block_hash),
            _ => None,
        })
    }

    #[traced_test]
    #[test]
    fn test_leader_requests_then_proposes() {
        let tc = TestCommittee::new(4);
        let mut leader = make_node(&tc, tc.leader_index(NUM, ViewId(0)));
        assert!(leader.is_leader());

        let actions = leader.start();
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::RequestProposal { block_num, view_id } if *block_num == NUM && *view_id == ViewId(0)
        )));
        assert_eq!(timer_durations(&actions), vec![Duration::from_secs(5)]);

        let (hash, body) = test_block(NUM, "a");
        let actions = leader.handle(Event::ProposalReady {
            block_num: NUM,
            view_id: ViewId(0),
            block_hash: hash,
            payload: body,
        });
        assert_eq!(
            sent_types(&actions),
            vec![MessageType::Announce, MessageType::Prepare]
        );
        assert_eq!(leader.phase(), Phase::Prepare);
    }

    #[traced_test]
    #[test]
    fn test_proposal_for_other_round_is_ignored() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();

        let (hash, body) = test_block(NUM, "a");
        let actions = replica.handle(Event::ProposalReady {
            block_num: NUM,
            view_id: ViewId(0),
            block_hash: hash,
            payload: body,
        });
        assert!(actions.is_empty());
        assert!(replica.log().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_replica_prepares_on_leader_announce() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        let actions = replica.start();
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::RequestProposal { .. })));

        let (hash, body) = test_block(NUM, "a");
        let actions = deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash, body));

        let sent = sent(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::Prepare);
        assert_eq!(sent[0].block_hash, hash);
        assert_eq!(replica.phase(), Phase::Prepare);
    }

    #[traced_test]
    #[test]
    fn test_announce_from_non_leader_is_dropped() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();

        let (hash, body) = test_block(NUM, "a");
        let actions = deliver(&mut replica, tc.builder(2).announce(NUM, ViewId(0), hash, body));
        assert!(actions.is_empty());
        assert!(replica.log().is_empty());
        assert_eq!(replica.phase(), Phase::WaitForAnnounce);
    }

    #[traced_test]
    #[test]
    fn test_replica_round_delivers_and_advances() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();
        let (hash, body) = test_block(NUM, "a");

        deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash, body.clone()));
        let actions = deliver(&mut replica, tc.builder(1).prepare(NUM, ViewId(0), hash));
        assert!(actions.is_empty());

        let actions = deliver(&mut replica, tc.builder(2).prepare(NUM, ViewId(0), hash));
        assert_eq!(sent_types(&actions), vec![MessageType::Commit]);
        assert_eq!(replica.phase(), Phase::Commit);
        assert_eq!(replica.prepared().map(|p| p.block_hash()), Some(hash));

        let actions = deliver_all(
            &mut replica,
            tc.votes(MessageType::Commit, NUM, ViewId(0), hash, &[1, 2]),
        );
        assert_eq!(delivered(&actions), Some(hash));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::DeliverBlock { payload, .. } if *payload == body
        )));

        assert_eq!(replica.block_num(), BlockNum(2));
        assert_eq!(replica.view_id(), ViewId(0));
        assert_eq!(replica.phase(), Phase::WaitForAnnounce);
        assert_eq!(replica.last_committed(), Some((NUM, hash)));
        assert!(replica.prepared().is_none());
        assert_eq!(
            replica
                .log()
                .get_messages_by_type_seq_view(MessageType::Commit, NUM, ViewId(0))
                .len(),
            3
        );
        assert_eq!(timer_durations(&actions), vec![Duration::from_secs(5)]);
    }

    #[traced_test]
    #[test]
    fn test_leader_broadcasts_certificates() {
        let tc = TestCommittee::new(4);
        let mut leader = make_node(&tc, 1);
        leader.start();
        let (hash, body) = test_block(NUM, "a");
        leader.handle(Event::ProposalReady {
            block_num: NUM,
            view_id: ViewId(0),
            block_hash: hash,
            payload: body,
        });

        let actions = deliver_all(
            &mut leader,
            tc.votes(MessageType::Prepare, NUM, ViewId(0), hash, &[0, 2]),
        );
        assert_eq!(
            sent_types(&actions),
            vec![MessageType::PrepareAck, MessageType::Commit]
        );
        let ack = &sent(&actions)[0];
        let proof = ack.proof.as_ref().unwrap();
        assert_eq!(proof.signers.count(), 3);
        assert!(leader.decider().is_proof_quorum(proof));

        let actions = deliver_all(
            &mut leader,
            tc.votes(MessageType::Commit, NUM, ViewId(0), hash, &[0, 2]),
        );
        assert_eq!(sent_types(&actions), vec![MessageType::CommitAck]);
        assert_eq!(delivered(&actions), Some(hash));
    }

    #[traced_test]
    #[test]
    fn test_replica_follows_leader_certificates() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();
        let (hash, body) = test_block(NUM, "a");
        deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash, body));

        let proof = tc.proof(MessageType::Prepare, NUM, ViewId(0), hash, &[1, 2, 3]);
        let actions = deliver(&mut replica, tc.builder(1).prepare_ack(proof));
        assert_eq!(sent_types(&actions), vec![MessageType::Commit]);

        let proof = tc.proof(MessageType::Commit, NUM, ViewId(0), hash, &[1, 2, 3]);
        let actions = deliver(&mut replica, tc.builder(1).commit_ack(proof));
        assert_eq!(delivered(&actions), Some(hash));
    }

    #[traced_test]
    #[test]
    fn test_certificate_without_quorum_is_not_followed() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();
        let (hash, body) = test_block(NUM, "a");
        deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash, body));

        let proof = tc.proof(MessageType::Prepare, NUM, ViewId(0), hash, &[1, 2]);
        let actions = deliver(&mut replica, tc.builder(1).prepare_ack(proof));
        assert!(actions.is_empty());
        assert_eq!(replica.phase(), Phase::Prepare);
    }

    #[traced_test]
    #[test]
    fn test_votes_before_announce_take_effect() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();
        let (hash, body) = test_block(NUM, "a");

        let actions = deliver_all(
            &mut replica,
            tc.votes(MessageType::Prepare, NUM, ViewId(0), hash, &[1, 2, 3]),
        );
        assert!(actions.is_empty());
        assert_eq!(replica.log().len(), 3);

        let actions = deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash, body));
        assert_eq!(
            sent_types(&actions),
            vec![MessageType::Prepare, MessageType::Commit]
        );
    }

    #[traced_test]
    #[test]
    fn test_equivocating_leader_is_reported() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();
        let (hash_a, body_a) = test_block(NUM, "a");
        let (hash_b, body_b) = test_block(NUM, "b");

        deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash_a, body_a));
        let actions = deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash_b, body_b));

        let [Action::ReportFault { evidence }] = actions.as_slice() else {
            panic!("expected a single fault report, got {actions:?}");
        };
        assert_eq!(evidence.offender(), ValidatorId(1));
        assert_eq!(evidence.first.block_hash, hash_a);
        assert_eq!(evidence.second.block_hash, hash_b);
        assert_eq!(replica.phase(), Phase::Prepare);
        assert!(!replica
            .log()
            .has_matching_view_announce(NUM, ViewId(0), &hash_b));
        assert!(logs_contain("Equivocation detected"));
    }

    #[traced_test]
    #[test]
    fn test_timeout_starts_view_change() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();

        let actions = replica.handle(Event::ViewChangeTimer);
        assert_eq!(replica.phase(), Phase::ViewChanging);
        assert_eq!(timer_durations(&actions), vec![Duration::from_secs(7)]);
        let sent = sent(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::ViewChange);
        assert_eq!(sent[0].view_id, ViewId(1));
        assert!(sent[0].block_hash.is_zero());

        let actions = replica.handle(Event::ViewChangeTimer);
        assert_eq!(timer_durations(&actions), vec![Duration::from_secs(9)]);
        assert_eq!(sent_types(&actions), vec![MessageType::ViewChange]);
        assert_eq!(self::sent(&actions)[0].view_id, ViewId(2));
        assert_eq!(replica.consecutive_view_changes(), 2);
    }

    #[traced_test]
    #[test]
    fn test_repeated_timeouts_report_liveness_failure() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();

        let reports: Vec<bool> = (0..3)
            .map(|_| {
                replica
                    .handle(Event::ViewChangeTimer)
                    .iter()
                    .any(|a| matches!(a, Action::ReportLivenessFailure { .. }))
            })
            .collect();
        assert_eq!(reports, vec![false, false, true]);
        assert!(logs_contain("Repeated view changes without progress"));
    }

    #[traced_test]
    #[test]
    fn test_new_leader_takes_over_after_view_change_quorum() {
        let tc = TestCommittee::new(4);
        let next_leader = tc.leader_index(NUM, ViewId(1));
        let mut node = make_node(&tc, next_leader);
        node.start();
        node.handle(Event::ViewChangeTimer);

        let actions = deliver(&mut node, tc.builder(0).view_change(NUM, ViewId(1), None));
        assert!(actions.is_empty());

        let actions = deliver(&mut node, tc.builder(1).view_change(NUM, ViewId(1), None));
        assert_eq!(node.view_id(), ViewId(1));
        assert!(node.is_leader());
        assert_eq!(sent_types(&actions), vec![MessageType::NewView]);
        let new_view = &sent(&actions)[0];
        assert!(new_view.block_hash.is_zero());
        assert!(node.decider().is_proof_quorum(new_view.proof.as_ref().unwrap()));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::RequestProposal { view_id, .. } if *view_id == ViewId(1)
        )));

        let (hash, body) = test_block(NUM, "b");
        let actions = node.handle(Event::ProposalReady {
            block_num: NUM,
            view_id: ViewId(1),
            block_hash: hash,
            payload: body,
        });
        assert_eq!(
            sent_types(&actions),
            vec![MessageType::Announce, MessageType::Prepare]
        );
    }

    #[traced_test]
    #[test]
    fn test_new_leader_reproposes_prepared_block() {
        let tc = TestCommittee::new(4);
        let mut node = make_node(&tc, 2);
        node.start();
        let (hash, body) = test_block(NUM, "a");

        deliver(&mut node, tc.builder(1).announce(NUM, ViewId(0), hash, body.clone()));
        deliver_all(
            &mut node,
            tc.votes(MessageType::Prepare, NUM, ViewId(0), hash, &[0, 1]),
        );
        assert_eq!(node.phase(), Phase::Commit);

        let actions = node.handle(Event::ViewChangeTimer);
        let vote = &sent(&actions)[0];
        assert_eq!(vote.proof.as_ref().map(|p| p.block_hash), Some(hash));
        assert_eq!(vote.payload, body);

        let actions = deliver_all(
            &mut node,
            vec![
                tc.builder(0).view_change(NUM, ViewId(1), None),
                tc.builder(1).view_change(NUM, ViewId(1), None),
            ],
        );
        assert_eq!(
            sent_types(&actions),
            vec![MessageType::NewView, MessageType::Announce, MessageType::Prepare]
        );
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::RequestProposal { .. })));

        let sent = sent(&actions);
        assert_eq!(sent[0].block_hash, hash);
        assert_eq!(sent[1].block_hash, hash);
        assert_eq!(sent[1].view_id, ViewId(1));
        assert_eq!(sent[1].proof.as_ref().map(|p| p.view_id), Some(ViewId(0)));
        assert_eq!(sent[1].payload, body);
        assert!(logs_contain("Re-proposing prepared block"));
    }

    #[traced_test]
    #[test]
    fn test_replica_adopts_view_from_new_view() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();

        let proof = tc.proof(MessageType::ViewChange, NUM, ViewId(1), Hash::ZERO, &[1, 2, 3]);
        let actions = deliver(&mut replica, tc.builder(2).new_view(NUM, ViewId(1), proof, None));
        assert_eq!(replica.view_id(), ViewId(1));
        assert_eq!(replica.phase(), Phase::WaitForAnnounce);
        assert_eq!(timer_durations(&actions).len(), 1);
        assert!(sent(&actions).is_empty());

        let (hash, body) = test_block(NUM, "b");
        let actions = deliver(&mut replica, tc.builder(2).announce(NUM, ViewId(1), hash, body));
        assert_eq!(sent_types(&actions), vec![MessageType::Prepare]);
        assert_eq!(sent(&actions)[0].view_id, ViewId(1));
    }

    #[traced_test]
    #[test]
    fn test_new_view_without_quorum_is_ignored() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();

        let proof = tc.proof(MessageType::ViewChange, NUM, ViewId(1), Hash::ZERO, &[1, 2]);
        deliver(&mut replica, tc.builder(2).new_view(NUM, ViewId(1), proof, None));
        assert_eq!(replica.view_id(), ViewId(0));
    }

    #[traced_test]
    #[test]
    fn test_locked_replica_only_votes_for_proven_reproposal() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();
        let (hash_a, body_a) = test_block(NUM, "a");
        let (hash_b, body_b) = test_block(NUM, "b");

        deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash_a, body_a.clone()));
        deliver_all(
            &mut replica,
            tc.votes(MessageType::Prepare, NUM, ViewId(0), hash_a, &[1, 2]),
        );
        assert_eq!(replica.prepared().map(|p| p.block_hash()), Some(hash_a));

        let proof = tc.proof(MessageType::ViewChange, NUM, ViewId(1), Hash::ZERO, &[1, 2, 3]);
        deliver(&mut replica, tc.builder(2).new_view(NUM, ViewId(1), proof, None));
        let actions = deliver(&mut replica, tc.builder(2).announce(NUM, ViewId(1), hash_b, body_b));
        assert!(sent(&actions).is_empty());
        assert_eq!(replica.phase(), Phase::WaitForAnnounce);
        assert!(logs_contain("proposal conflicts with our prepared block"));

        let proof = tc.proof(MessageType::ViewChange, NUM, ViewId(2), Hash::ZERO, &[1, 2, 3]);
        deliver(&mut replica, tc.builder(3).new_view(NUM, ViewId(2), proof, None));
        assert_eq!(replica.view_id(), ViewId(2));

        let prepared = tc.proof(MessageType::Prepare, NUM, ViewId(0), hash_a, &[0, 1, 2]);
        let actions = deliver(
            &mut replica,
            tc.builder(3).reproposal(ViewId(2), body_a, prepared),
        );
        assert_eq!(sent_types(&actions), vec![MessageType::Prepare]);
        assert_eq!(sent(&actions)[0].block_hash, hash_a);
    }

    #[traced_test]
    #[test]
    fn test_stale_and_far_future_messages_are_dropped() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();
        let hash = Hash::from_bytes(b"x");

        assert!(deliver(&mut replica, tc.builder(2).prepare(BlockNum(0), ViewId(0), hash)).is_empty());
        assert!(deliver(&mut replica, tc.builder(2).prepare(BlockNum(18), ViewId(0), hash)).is_empty());
        assert!(replica.log().is_empty());

        assert!(deliver(&mut replica, tc.builder(2).prepare(BlockNum(2), ViewId(0), hash)).is_empty());
        assert_eq!(replica.log().len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_next_block_traffic_applies_after_commit() {
        let tc = TestCommittee::new(4);
        let mut replica = make_node(&tc, 0);
        replica.start();
        let (hash_1, body_1) = test_block(NUM, "a");
        let next = NUM.next();
        let (hash_2, body_2) = test_block(next, "a");

        let next_leader = tc.leader_index(next, ViewId(0));
        deliver(
            &mut replica,
            tc.builder(next_leader).announce(next, ViewId(0), hash_2, body_2),
        );

        deliver(&mut replica, tc.builder(1).announce(NUM, ViewId(0), hash_1, body_1));
        let proof = tc.proof(MessageType::Commit, NUM, ViewId(0), hash_1, &[1, 2, 3]);
        let actions = deliver(&mut replica, tc.builder(1).commit_ack(proof));

        assert_eq!(delivered(&actions), Some(hash_1));
        assert_eq!(replica.block_num(), next);
        let prepares: Vec<_> = sent(&actions)
            .into_iter()
            .filter(|m| m.message_type == MessageType::Prepare && m.block_num == next)
            .collect();
        assert_eq!(prepares.len(), 1);
        assert_eq!(prepares[0].block_hash, hash_2);
    }
}
