//! Quorum decisions over committee voting power.

use crate::config::ConfigError;
use crate::FbftLog;
use fbft_messages::{MessageType, QuorumProof};
use fbft_types::{BlockNum, Committee, Hash, ValidatorId, ViewId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Threshold a set of signers must strictly exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuorumPolicy {
    /// More than two thirds of total voting power.
    SuperMajorityVote,
    /// More than half of total voting power.
    SimpleMajorityVote,
    /// More than `numerator / denominator` of total voting power.
    Fraction { numerator: u64, denominator: u64 },
}

impl QuorumPolicy {
    /// Whether `voted` out of `total` power meets the threshold.
    pub fn is_met(&self, voted: u64, total: u64) -> bool {
        let (voted, total) = (voted as u128, total as u128);
        match *self {
            QuorumPolicy::SuperMajorityVote => voted * 3 > total * 2,
            QuorumPolicy::SimpleMajorityVote => voted * 2 > total,
            QuorumPolicy::Fraction {
                numerator,
                denominator,
            } => voted * denominator as u128 > total * numerator as u128,
        }
    }

    /// Fractions below one half would let two disjoint sets both reach quorum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            QuorumPolicy::Fraction {
                numerator,
                denominator,
            } if denominator == 0
                || numerator >= denominator
                || (numerator as u128) * 2 < denominator as u128 =>
            {
                Err(ConfigError::InvalidFraction {
                    numerator,
                    denominator,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Decides whether a set of senders holds a quorum of the committee's power.
///
/// The committee is fixed for the decider's lifetime; reconfiguration builds
/// a new decider around the new `Arc<Committee>`.
#[derive(Debug, Clone)]
pub struct QuorumDecider {
    committee: Arc<Committee>,
    policy: QuorumPolicy,
    overrides: HashMap<MessageType, QuorumPolicy>,
}

impl QuorumDecider {
    pub fn new(policy: QuorumPolicy, committee: Arc<Committee>) -> Self {
        Self {
            committee,
            policy,
            overrides: HashMap::new(),
        }
    }

    /// Use a different policy for one message type.
    pub fn with_policy_for(mut self, message_type: MessageType, policy: QuorumPolicy) -> Self {
        self.overrides.insert(message_type, policy);
        self
    }

    pub fn committee(&self) -> &Arc<Committee> {
        &self.committee
    }

    /// Policy that applies to votes of `message_type`.
    pub fn policy_for(&self, message_type: MessageType) -> QuorumPolicy {
        self.overrides
            .get(&message_type)
            .copied()
            .unwrap_or(self.policy)
    }

    /// Sum of the voting power of distinct committee members in `signers`.
    ///
    /// Unknown signers contribute nothing.
    pub fn voting_power(&self, signers: impl IntoIterator<Item = ValidatorId>) -> u64 {
        signers
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|v| self.committee.voting_power(v))
            .sum()
    }

    /// Whether `power` meets the policy for `message_type`.
    pub fn is_power_sufficient(&self, message_type: MessageType, power: u64) -> bool {
        self.policy_for(message_type)
            .is_met(power, self.committee.total_voting_power())
    }

    /// Whether the log holds a quorum of messages for the exact key.
    ///
    /// Monotonic: the sender set behind a key only grows until pruned.
    pub fn is_quorum_achieved(
        &self,
        log: &FbftLog,
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: &Hash,
    ) -> bool {
        let senders = log
            .get_messages_by_type_seq_view_hash(message_type, block_num, view_id, block_hash)
            .into_iter()
            .map(|m| m.sender);
        self.is_power_sufficient(message_type, self.voting_power(senders))
    }

    /// Whether a proof's signers hold a quorum for its message type.
    ///
    /// Does not check the aggregated signature.
    pub fn is_proof_quorum(&self, proof: &QuorumProof) -> bool {
        match self.committee.signers_of(&proof.signers) {
            Some(signers) => {
                self.is_power_sufficient(proof.message_type, self.voting_power(signers))
            }
            None => false,
        }
    }
}
