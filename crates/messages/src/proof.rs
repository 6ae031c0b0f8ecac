//! Aggregated quorum proofs.

use crate::{FbftMessage, MessageType};
use fbft_types::{
    consensus_digest, AggregateError, BlockNum, Committee, Hash, ShardId, Signature,
    SignerBitfield, ViewId,
};
use sbor::prelude::BasicSbor;

/// Certificate that the members marked in `signers` all signed the digest of
/// (`message_type`, `block_num`, `view_id`, `block_hash`).
///
/// Carried by PrepareAck and CommitAck (prepare/commit quorum), by NewView
/// (view change quorum) and by ViewChange (the sender's prepared block).
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct QuorumProof {
    /// Type of the aggregated votes.
    pub message_type: MessageType,
    /// Block number the votes are for.
    pub block_num: BlockNum,
    /// View the votes were cast in.
    pub view_id: ViewId,
    /// Block hash the votes are for (zero for view change votes).
    pub block_hash: Hash,
    /// Committee indices of the signers.
    pub signers: SignerBitfield,
    /// Aggregated BLS signature of all signers.
    pub signature: Signature,
}

impl QuorumProof {
    /// Aggregate the signatures of `votes` into a proof.
    ///
    /// Votes must all share the given key; votes from non-members are skipped.
    pub fn aggregate<'a>(
        committee: &Committee,
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        votes: impl IntoIterator<Item = &'a FbftMessage>,
    ) -> Result<Self, AggregateError> {
        let mut signers = SignerBitfield::new(committee.len());
        let mut signatures = Vec::new();
        for vote in votes {
            debug_assert_eq!(vote.message_type, message_type);
            let Some(index) = committee.index_of(vote.sender) else {
                continue;
            };
            if signers.is_set(index) {
                continue;
            }
            signers.set(index);
            signatures.push(vote.signature.clone());
        }

        let signature = Signature::aggregate(&signatures)?;
        Ok(Self {
            message_type,
            block_num,
            view_id,
            block_hash,
            signers,
            signature,
        })
    }

    /// The digest every signer signed.
    pub fn digest(&self, shard: ShardId) -> Vec<u8> {
        consensus_digest(
            shard,
            self.message_type.tag(),
            self.block_num,
            self.view_id,
            &self.block_hash,
        )
    }

    /// Whether this proof certifies exactly the given key.
    pub fn is_for(
        &self,
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: &Hash,
    ) -> bool {
        self.message_type == message_type
            && self.block_num == block_num
            && self.view_id == view_id
            && self.block_hash == *block_hash
    }
}
