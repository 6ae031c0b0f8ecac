//! Deterministic simulation runner.
//!
//! Every node is a [`ConsensusState`] with its own log. The runner plays the
//! part of the production runtime for all of them: it moves messages through
//! a [`SimulatedNetwork`], fires timers on virtual time, answers proposal
//! requests synchronously and records what each node finalizes.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::NodeIndex;
use fbft_consensus::{verify_message, ConfigError, ConsensusConfig, ConsensusState};
use fbft_core::{Action, Event, OutboundMessage, StateMachine, TimerId};
use fbft_messages::{EquivocationEvidence, FbftMessage, MessageBuilder, MessageType};
use fbft_types::{
    BlockNum, Committee, CommitteeError, Hash, KeyPair, ShardId, ValidatorId, ValidatorInfo,
    ViewId,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Gap between an equivocating leader's two conflicting proposals.
const EQUIVOCATION_GAP: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid committee: {0}")]
    Committee(#[from] CommitteeError),

    #[error("invalid consensus config: {0}")]
    Config(#[from] ConfigError),
}

/// A block a node handed to its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredBlock {
    pub block_num: BlockNum,
    pub view_id: ViewId,
    pub block_hash: Hash,
}

/// A liveness failure a node reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessReport {
    pub node: NodeIndex,
    pub block_num: BlockNum,
    pub view_id: ViewId,
    pub consecutive_view_changes: u64,
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Events processed by priority.
    pub events_by_priority: [u64; 3],
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages sent (successfully scheduled for delivery).
    pub messages_sent: u64,
    /// Messages dropped due to network partition.
    pub messages_dropped_partition: u64,
    /// Messages dropped due to packet loss.
    pub messages_dropped_loss: u64,
    /// Messages that failed verification on arrival.
    pub messages_rejected: u64,
    /// Events discarded because their node had crashed.
    pub events_dropped_crashed: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Proposals the runner produced for leaders.
    pub proposals: u64,
}

impl SimulationStats {
    /// Total messages dropped (partition + packet loss).
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss
    }

    /// Message delivery rate (sent / (sent + dropped)).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_dropped();
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Deterministic simulation runner.
///
/// Processes events in deterministic order and executes actions.
/// Given the same seed, produces identical results every run.
pub struct SimulationRunner {
    /// All nodes in the simulation, indexed by NodeIndex.
    nodes: Vec<ConsensusState>,

    /// Signing builders, used to forge conflicting proposals for
    /// equivocating nodes.
    builders: Vec<MessageBuilder>,

    committee: Arc<Committee>,

    /// Global event queue, ordered deterministically.
    event_queue: BTreeMap<EventKey, Event>,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    now: Duration,

    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: ChaCha8Rng,

    /// Pending timer per (node, timer) so a new timer replaces the old one.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    crashed: HashSet<NodeIndex>,

    equivocating: HashSet<NodeIndex>,

    delivered: Vec<Vec<DeliveredBlock>>,

    faults: Vec<(NodeIndex, EquivocationEvidence)>,

    liveness_failures: Vec<LivenessReport>,

    stats: SimulationStats,
}

impl SimulationRunner {
    /// Build a committee of `network_config.num_validators` nodes with keys
    /// derived from `seed`.
    pub fn new(
        network_config: NetworkConfig,
        consensus_config: ConsensusConfig,
        seed: u64,
    ) -> Result<Self, SimulationError> {
        consensus_config.validate()?;

        let keys: Vec<KeyPair> = (0..network_config.num_validators)
            .map(|i| KeyPair::from_seed(&node_seed(seed, i)))
            .collect();
        let members = keys
            .iter()
            .enumerate()
            .map(|(i, key)| ValidatorInfo {
                validator_id: ValidatorId(i as u64),
                public_key: key.public_key(),
                voting_power: 1,
            })
            .collect();
        let committee = Committee::new(ShardId::BEACON, members)?.into_arc();

        let builders: Vec<MessageBuilder> = keys
            .into_iter()
            .enumerate()
            .map(|(i, key)| MessageBuilder::new(committee.shard(), ValidatorId(i as u64), key))
            .collect();
        let nodes = builders
            .iter()
            .map(|builder| {
                ConsensusState::new(
                    builder.clone(),
                    committee.clone(),
                    consensus_config.clone(),
                    BlockNum(1),
                )
            })
            .collect::<Vec<_>>();

        info!(
            num_nodes = nodes.len(),
            seed,
            "Created simulation runner"
        );

        Ok(Self {
            delivered: vec![Vec::new(); nodes.len()],
            nodes,
            builders,
            committee,
            event_queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network: SimulatedNetwork::new(network_config),
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: HashMap::new(),
            crashed: HashSet::new(),
            equivocating: HashSet::new(),
            faults: Vec::new(),
            liveness_failures: Vec::new(),
            stats: SimulationStats::default(),
        })
    }

    // ─── Inspection ───

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn committee(&self) -> &Arc<Committee> {
        &self.committee
    }

    pub fn node(&self, index: NodeIndex) -> Option<&ConsensusState> {
        self.nodes.get(index as usize)
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// Blocks `node` has finalized, in order.
    pub fn delivered(&self, node: NodeIndex) -> &[DeliveredBlock] {
        self.delivered
            .get(node as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Equivocation evidence reported so far, with the reporting node.
    pub fn faults(&self) -> &[(NodeIndex, EquivocationEvidence)] {
        &self.faults
    }

    pub fn liveness_failures(&self) -> &[LivenessReport] {
        &self.liveness_failures
    }

    /// Nodes that have not crashed.
    pub fn live_nodes(&self) -> Vec<NodeIndex> {
        self.network
            .all_nodes()
            .into_iter()
            .filter(|n| !self.crashed.contains(n))
            .collect()
    }

    // ─── Faults ───

    /// Stop a node. It processes no further events and receives nothing.
    pub fn crash_node(&mut self, node: NodeIndex) {
        info!(node, "Crashing node");
        self.crashed.insert(node);
    }

    /// Make a node's proposals equivocate: every peer receives the real
    /// proposal and a conflicting one signed by the same node. At most
    /// half of the peers see the real one first.
    pub fn set_equivocating(&mut self, node: NodeIndex) {
        info!(node, "Node will equivocate");
        self.equivocating.insert(node);
    }

    // ─── Running ───

    /// Start every live node at the current time.
    pub fn start(&mut self) {
        for node in self.live_nodes() {
            let state = &mut self.nodes[node as usize];
            state.set_time(self.now);
            let actions = state.start();
            self.stats.actions_generated += actions.len() as u64;
            for action in actions {
                self.process_action(node, action);
            }
        }
    }

    /// Run simulation until no more events or time limit reached.
    pub fn run_until(&mut self, end_time: Duration) {
        trace!(
            end_time_secs = end_time.as_secs_f64(),
            "Running simulation step"
        );

        while let Some(key) = self.event_queue.first_key_value().map(|(k, _)| *k) {
            if key.time > end_time {
                debug!(
                    remaining_events = self.event_queue.len(),
                    "Time limit reached"
                );
                break;
            }

            let Some(event) = self.event_queue.remove(&key) else {
                break;
            };
            self.now = key.time;
            let node_index = key.node_index;

            if matches!(event, Event::ViewChangeTimer) {
                self.timers.remove(&(node_index, TimerId::ViewChange));
            }
            if self.crashed.contains(&node_index) {
                self.stats.events_dropped_crashed += 1;
                continue;
            }
            if let Event::MessageReceived { message } = &event {
                if let Err(e) = verify_message(&self.committee, message) {
                    self.stats.messages_rejected += 1;
                    warn!(node = node_index, error = %e, "Rejected inbound message");
                    continue;
                }
            }

            trace!(
                time = ?self.now,
                node = node_index,
                event = event.type_name(),
                "Processing event"
            );

            self.stats.events_processed += 1;
            self.stats.events_by_priority[event.priority() as usize] += 1;

            let node = &mut self.nodes[node_index as usize];
            node.set_time(self.now);
            let actions = node.handle(event);

            self.stats.actions_generated += actions.len() as u64;

            for action in actions {
                self.process_action(node_index, action);
            }
        }

        if self.now < end_time {
            self.now = end_time;
        }

        trace!(
            events_processed = self.stats.events_processed,
            actions_generated = self.stats.actions_generated,
            final_time = ?self.now,
            "Simulation step complete"
        );
    }

    /// Process an action from a node.
    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::Broadcast { message } => {
                let peers: Vec<NodeIndex> = self
                    .network
                    .all_nodes()
                    .into_iter()
                    .filter(|&to| to != from)
                    .collect();
                let forged = self.forge_conflicting(from, &message);

                for (rank, &to) in peers.iter().enumerate() {
                    let Some(latency) = self.sample_link(from, to) else {
                        continue;
                    };
                    let mut deliveries = vec![message.message.clone()];
                    if let Some(conflicting) = &forged {
                        // Neither version may reach a quorum of first-seen votes.
                        if rank < peers.len() / 2 {
                            deliveries.push(conflicting.clone());
                        } else {
                            deliveries.insert(0, conflicting.clone());
                        }
                    }
                    for (i, message) in deliveries.into_iter().enumerate() {
                        self.schedule_event(
                            to,
                            self.now + latency + EQUIVOCATION_GAP * i as u32,
                            Event::MessageReceived { message },
                        );
                        self.stats.messages_sent += 1;
                    }
                }
            }

            Action::SetTimer { id, duration } => {
                if let Some(previous) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&previous);
                }
                let event = match id {
                    TimerId::ViewChange => Event::ViewChangeTimer,
                };
                let key = self.schedule_event(from, self.now + duration, event);
                self.timers.insert((from, id), key);
                self.stats.timers_set += 1;
            }

            // The producer answers synchronously; the proposal is handled
            // after everything already queued for this instant.
            Action::RequestProposal { block_num, view_id } => {
                let payload = format!(
                    "block {} view {} proposer {}",
                    block_num.0, view_id.0, from
                )
                .into_bytes();
                self.stats.proposals += 1;
                self.schedule_event(
                    from,
                    self.now,
                    Event::ProposalReady {
                        block_num,
                        view_id,
                        block_hash: Hash::from_bytes(&payload),
                        payload,
                    },
                );
            }

            Action::DeliverBlock {
                block_num,
                view_id,
                block_hash,
                ..
            } => {
                debug!(
                    node = from,
                    block_num = block_num.0,
                    view_id = view_id.0,
                    block_hash = ?block_hash,
                    "Block delivered"
                );
                self.delivered[from as usize].push(DeliveredBlock {
                    block_num,
                    view_id,
                    block_hash,
                });
            }

            Action::ReportFault { evidence } => {
                warn!(
                    node = from,
                    offender = ?evidence.offender(),
                    message_type = %evidence.message_type(),
                    "Equivocation reported"
                );
                self.faults.push((from, evidence));
            }

            Action::ReportLivenessFailure {
                block_num,
                view_id,
                consecutive_view_changes,
            } => {
                self.liveness_failures.push(LivenessReport {
                    node: from,
                    block_num,
                    view_id,
                    consecutive_view_changes,
                });
            }
        }
    }

    /// A second, conflicting proposal for an equivocating node's announce.
    fn forge_conflicting(
        &self,
        from: NodeIndex,
        message: &OutboundMessage,
    ) -> Option<Arc<FbftMessage>> {
        if !self.equivocating.contains(&from) || message.message_type() != MessageType::Announce {
            return None;
        }
        let original = &message.message;
        let mut payload = original.payload.clone();
        payload.extend_from_slice(b" (conflicting)");
        let conflicting = self.builders[from as usize].announce(
            original.block_num,
            original.view_id,
            Hash::from_bytes(&payload),
            payload,
        );
        Some(Arc::new(conflicting))
    }

    fn schedule_event(&mut self, node: NodeIndex, time: Duration, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey::new(time, &event, node, self.sequence);
        self.event_queue.insert(key, event);
        key
    }

    /// Latency of one message from `from` to `to`, or `None` if a partition
    /// or packet loss drops it.
    fn sample_link(&mut self, from: NodeIndex, to: NodeIndex) -> Option<Duration> {
        // Partitions first; they don't consume RNG
        if self.network.is_partitioned(from, to) {
            self.stats.messages_dropped_partition += 1;
            trace!(from, to, "Message dropped due to partition");
            return None;
        }

        if self.network.should_drop_packet(&mut self.rng) {
            self.stats.messages_dropped_loss += 1;
            trace!(from, to, "Message dropped due to packet loss");
            return None;
        }

        Some(self.network.sample_latency(&mut self.rng))
    }
}

fn node_seed(seed: u64, index: NodeIndex) -> [u8; 32] {
    Hash::from_parts(&[
        b"fbft-simulation".as_slice(),
        &seed.to_le_bytes(),
        &index.to_le_bytes(),
    ])
    .to_bytes()
}
