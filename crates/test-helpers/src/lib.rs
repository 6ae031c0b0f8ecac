//! Test helpers for FBFT consensus.
//!
//! Every fixture is signed with real BLS keys derived from fixed seeds, so
//! tests exercise the same verification paths as production and produce the
//! same bytes on every run.

use fbft_messages::{FbftMessage, MessageBuilder, MessageType, QuorumProof};
use fbft_types::{
    BlockNum, Committee, Hash, KeyPair, ShardId, ValidatorId, ValidatorInfo, ViewId,
};
use std::sync::Arc;

/// Deterministic key seed for the validator at committee index `index`.
pub fn seed_for(index: usize) -> [u8; 32] {
    Hash::from_parts(&[b"fbft-test-validator".as_slice(), &(index as u64).to_le_bytes()]).to_bytes()
}

/// Deterministic block body and hash for a block number.
pub fn test_block(block_num: BlockNum, tag: &str) -> (Hash, Vec<u8>) {
    let payload = format!("block {} {}", block_num.0, tag).into_bytes();
    (Hash::from_bytes(&payload), payload)
}

/// A committee whose members' keys are all known to the test.
///
/// Validator `i` has id `ValidatorId(i)` and committee index `i`.
pub struct TestCommittee {
    keys: Vec<KeyPair>,
    committee: Arc<Committee>,
}

impl TestCommittee {
    /// Committee of `size` members with equal voting power.
    pub fn new(size: usize) -> Self {
        Self::with_powers(&vec![1; size])
    }

    /// Committee with one member per entry of `powers`.
    pub fn with_powers(powers: &[u64]) -> Self {
        let keys: Vec<KeyPair> = (0..powers.len())
            .map(|i| KeyPair::from_seed(&seed_for(i)))
            .collect();
        let members = keys
            .iter()
            .zip(powers)
            .enumerate()
            .map(|(i, (key, &voting_power))| ValidatorInfo {
                validator_id: ValidatorId(i as u64),
                public_key: key.public_key(),
                voting_power,
            })
            .collect();
        let committee = Committee::new(ShardId::BEACON, members)
            .expect("test committee powers must be non-empty and non-zero")
            .into_arc();
        Self { keys, committee }
    }

    pub fn committee(&self) -> Arc<Committee> {
        self.committee.clone()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key(&self, index: usize) -> &KeyPair {
        &self.keys[index]
    }

    pub fn validator(&self, index: usize) -> ValidatorId {
        ValidatorId(index as u64)
    }

    /// Message builder signing as member `index`.
    pub fn builder(&self, index: usize) -> MessageBuilder {
        MessageBuilder::new(
            self.committee.shard(),
            self.validator(index),
            self.keys[index].clone(),
        )
    }

    /// Committee index of the leader for (block_num, view_id).
    pub fn leader_index(&self, block_num: BlockNum, view_id: ViewId) -> usize {
        self.committee.leader_for(block_num, view_id).0 as usize
    }

    /// Signed votes of `message_type` from each member in `signers`.
    pub fn votes(
        &self,
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        signers: &[usize],
    ) -> Vec<FbftMessage> {
        signers
            .iter()
            .map(|&i| {
                let builder = self.builder(i);
                match message_type {
                    MessageType::Prepare => builder.prepare(block_num, view_id, block_hash),
                    MessageType::Commit => builder.commit(block_num, view_id, block_hash),
                    MessageType::ViewChange => builder.view_change(block_num, view_id, None),
                    other => panic!("{other} is not a vote type"),
                }
            })
            .collect()
    }

    /// Aggregated proof over votes from `signers`.
    pub fn proof(
        &self,
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        signers: &[usize],
    ) -> QuorumProof {
        let votes = self.votes(message_type, block_num, view_id, block_hash, signers);
        QuorumProof::aggregate(
            &self.committee,
            message_type,
            block_num,
            view_id,
            block_hash,
            &votes,
        )
        .expect("test votes aggregate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        let a = TestCommittee::new(4);
        let b = TestCommittee::new(4);
        assert_eq!(a.key(2).public_key(), b.key(2).public_key());
        assert_ne!(a.key(1).public_key(), a.key(2).public_key());
    }

    #[test]
    fn test_proof_verifies() {
        let tc = TestCommittee::new(4);
        let (hash, _) = test_block(BlockNum(1), "a");
        let proof = tc.proof(MessageType::Prepare, BlockNum(1), ViewId(0), hash, &[0, 1, 3]);

        let keys: Vec<_> = [0, 1, 3].iter().map(|&i| tc.key(i).public_key()).collect();
        assert_eq!(proof.signers.count(), 3);
        assert!(fbft_types::PublicKey::verify_aggregate(
            &keys,
            &proof.digest(tc.committee().shard()),
            &proof.signature
        ));
    }
}
