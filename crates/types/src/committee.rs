//! Committee roster for one shard's consensus instance.

use crate::{BlockNum, PublicKey, ShardId, SignerBitfield, ValidatorId, ViewId};
use std::collections::HashMap;
use std::sync::Arc;

/// A committee member as configured at the start of an epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    /// Validator identity.
    pub validator_id: ValidatorId,
    /// BLS public key used to verify this member's messages.
    pub public_key: PublicKey,
    /// Voting power (stake weight). Equal weights give one-member-one-vote.
    pub voting_power: u64,
}

/// Errors that can occur when building a committee.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitteeError {
    /// A committee needs at least one member.
    #[error("committee has no members")]
    Empty,

    /// The same validator is listed twice.
    #[error("validator {0} is listed more than once")]
    DuplicateMember(ValidatorId),

    /// Total voting power must be positive.
    #[error("committee has zero total voting power")]
    ZeroVotingPower,

    /// Total voting power does not fit in a u64.
    #[error("committee total voting power overflows u64")]
    VotingPowerOverflow,
}

/// Immutable committee roster.
///
/// Total voting power is fixed for the lifetime of a committee. Reconfiguration
/// at an epoch boundary builds a new `Committee` rather than mutating this one,
/// so consensus components share it as `Arc<Committee>`.
#[derive(Debug, Clone)]
pub struct Committee {
    shard: ShardId,
    members: Vec<ValidatorInfo>,
    index: HashMap<ValidatorId, usize>,
    total_voting_power: u64,
}

impl Committee {
    /// Create a committee. Member order defines committee indices and leader rotation.
    pub fn new(shard: ShardId, members: Vec<ValidatorInfo>) -> Result<Self, CommitteeError> {
        if members.is_empty() {
            return Err(CommitteeError::Empty);
        }

        let mut index = HashMap::with_capacity(members.len());
        for (i, member) in members.iter().enumerate() {
            if index.insert(member.validator_id, i).is_some() {
                return Err(CommitteeError::DuplicateMember(member.validator_id));
            }
        }

        let total_voting_power = members
            .iter()
            .try_fold(0u64, |total, m| total.checked_add(m.voting_power))
            .ok_or(CommitteeError::VotingPowerOverflow)?;
        if total_voting_power == 0 {
            return Err(CommitteeError::ZeroVotingPower);
        }

        Ok(Self {
            shard,
            members,
            index,
            total_voting_power,
        })
    }

    /// Wrap the committee for sharing.
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Shard this committee runs consensus for.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false for a constructed committee; kept for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in committee order.
    pub fn members(&self) -> &[ValidatorInfo] {
        &self.members
    }

    /// Sum of all members' voting power.
    pub fn total_voting_power(&self) -> u64 {
        self.total_voting_power
    }

    /// Committee index of a validator.
    pub fn index_of(&self, validator_id: ValidatorId) -> Option<usize> {
        self.index.get(&validator_id).copied()
    }

    /// Validator at a committee index.
    pub fn member_at(&self, index: usize) -> Option<ValidatorId> {
        self.members.get(index).map(|m| m.validator_id)
    }

    /// Check committee membership.
    pub fn contains(&self, validator_id: ValidatorId) -> bool {
        self.index.contains_key(&validator_id)
    }

    /// Voting power of a member.
    pub fn voting_power(&self, validator_id: ValidatorId) -> Option<u64> {
        self.index_of(validator_id)
            .map(|i| self.members[i].voting_power)
    }

    /// Public key of a member.
    pub fn public_key(&self, validator_id: ValidatorId) -> Option<&PublicKey> {
        self.index_of(validator_id)
            .map(|i| &self.members[i].public_key)
    }

    /// Leader for a block number and view: round-robin over committee order.
    pub fn leader_for(&self, block_num: BlockNum, view_id: ViewId) -> ValidatorId {
        let n = self.members.len() as u64;
        let slot = (block_num.0 % n + view_id.0 % n) % n;
        self.members[slot as usize].validator_id
    }

    /// Build a bitfield for a set of signers. Non-members are skipped.
    pub fn bitfield_for(&self, signers: impl IntoIterator<Item = ValidatorId>) -> SignerBitfield {
        SignerBitfield::from_indices(
            self.len(),
            signers.into_iter().filter_map(|v| self.index_of(v)),
        )
    }

    /// Resolve the signers recorded in a bitfield.
    ///
    /// Returns `None` if the bitfield was not built for a committee of this size.
    pub fn signers_of(&self, bitfield: &SignerBitfield) -> Option<Vec<ValidatorId>> {
        if bitfield.num_validators() != self.len() || !bitfield.is_well_formed() {
            return None;
        }
        bitfield
            .set_indices()
            .map(|i| self.member_at(i))
            .collect()
    }
}
