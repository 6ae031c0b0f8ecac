//! Construction and signing of outbound messages.

use crate::{CodecError, FbftMessage, MessageType, QuorumProof};
use fbft_types::{BlockNum, Hash, KeyPair, ShardId, ValidatorId, ViewId};

/// Builds signed messages on behalf of the local validator.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    shard: ShardId,
    sender: ValidatorId,
    key: KeyPair,
}

impl MessageBuilder {
    pub fn new(shard: ShardId, sender: ValidatorId, key: KeyPair) -> Self {
        Self { shard, sender, key }
    }

    /// The validator messages are built for.
    pub fn sender(&self) -> ValidatorId {
        self.sender
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    fn build(
        &self,
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        payload: Vec<u8>,
        proof: Option<QuorumProof>,
    ) -> FbftMessage {
        let mut msg = FbftMessage {
            message_type,
            shard: self.shard,
            block_num,
            view_id,
            block_hash,
            sender: self.sender,
            payload,
            proof,
            signature: fbft_types::Signature::zero(),
        };
        msg.signature = self.key.sign(&msg.digest());
        msg
    }

    /// Leader proposal for (block_num, view_id).
    pub fn announce(
        &self,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        payload: Vec<u8>,
    ) -> FbftMessage {
        self.build(
            MessageType::Announce,
            block_num,
            view_id,
            block_hash,
            payload,
            None,
        )
    }

    /// Leader re-proposal of a block prepared in an earlier view, carrying
    /// its prepare proof.
    pub fn reproposal(
        &self,
        view_id: ViewId,
        payload: Vec<u8>,
        prepared: QuorumProof,
    ) -> FbftMessage {
        self.build(
            MessageType::Announce,
            prepared.block_num,
            view_id,
            prepared.block_hash,
            payload,
            Some(prepared),
        )
    }

    pub fn prepare(&self, block_num: BlockNum, view_id: ViewId, block_hash: Hash) -> FbftMessage {
        self.build(
            MessageType::Prepare,
            block_num,
            view_id,
            block_hash,
            Vec::new(),
            None,
        )
    }

    pub fn commit(&self, block_num: BlockNum, view_id: ViewId, block_hash: Hash) -> FbftMessage {
        self.build(
            MessageType::Commit,
            block_num,
            view_id,
            block_hash,
            Vec::new(),
            None,
        )
    }

    /// Leader certificate carrying the aggregated prepare votes.
    pub fn prepare_ack(&self, proof: QuorumProof) -> FbftMessage {
        self.build(
            MessageType::PrepareAck,
            proof.block_num,
            proof.view_id,
            proof.block_hash,
            Vec::new(),
            Some(proof),
        )
    }

    /// Leader certificate carrying the aggregated commit votes.
    pub fn commit_ack(&self, proof: QuorumProof) -> FbftMessage {
        self.build(
            MessageType::CommitAck,
            proof.block_num,
            proof.view_id,
            proof.block_hash,
            Vec::new(),
            Some(proof),
        )
    }

    /// Vote to move to `new_view`, optionally carrying the block this
    /// validator prepared (its prepare proof and payload).
    pub fn view_change(
        &self,
        block_num: BlockNum,
        new_view: ViewId,
        prepared: Option<(QuorumProof, Vec<u8>)>,
    ) -> FbftMessage {
        let (proof, payload) = match prepared {
            Some((proof, payload)) => (Some(proof), payload),
            None => (None, Vec::new()),
        };
        self.build(
            MessageType::ViewChange,
            block_num,
            new_view,
            Hash::ZERO,
            payload,
            proof,
        )
    }

    /// New leader certificate for `view_id`, optionally re-proposing a
    /// prepared block.
    pub fn new_view(
        &self,
        block_num: BlockNum,
        view_id: ViewId,
        proof: QuorumProof,
        reproposal: Option<(Hash, Vec<u8>)>,
    ) -> FbftMessage {
        let (block_hash, payload) = reproposal.unwrap_or((Hash::ZERO, Vec::new()));
        self.build(
            MessageType::NewView,
            block_num,
            view_id,
            block_hash,
            payload,
            Some(proof),
        )
    }
}

/// Build, sign and encode an Announce message.
///
/// Identical inputs always produce identical protocol fields.
pub fn construct_announce_message(
    builder: &MessageBuilder,
    block_num: BlockNum,
    view_id: ViewId,
    block_hash: Hash,
    payload: Vec<u8>,
) -> Result<Vec<u8>, CodecError> {
    builder
        .announce(block_num, view_id, block_hash, payload)
        .encode()
}
