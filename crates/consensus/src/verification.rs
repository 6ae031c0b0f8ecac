//! Stateless signature checks for inbound messages.
//!
//! Everything here depends only on the committee roster, so the runner can
//! verify many messages in parallel before they reach the state machine.

use fbft_messages::{FbftMessage, MessageType, QuorumProof};
use fbft_types::{Committee, PublicKey, ShardId, ValidatorId};
use thiserror::Error;

/// Reasons a message fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("message for shard {got:?} sent to committee of shard {expected:?}")]
    WrongShard { expected: ShardId, got: ShardId },

    #[error("sender {0:?} is not a committee member")]
    UnknownSender(ValidatorId),

    #[error("invalid signature from {0:?}")]
    InvalidSignature(ValidatorId),

    #[error("invalid {message_type} proof: {reason}")]
    InvalidProof {
        message_type: MessageType,
        reason: &'static str,
    },
}

/// Verify a message's signature and, if it carries one, its proof.
///
/// Quorum size of the proof is not checked here; that is the decider's call.
pub fn verify_message(committee: &Committee, message: &FbftMessage) -> Result<(), VerifyError> {
    if message.shard != committee.shard() {
        return Err(VerifyError::WrongShard {
            expected: committee.shard(),
            got: message.shard,
        });
    }

    let public_key = committee
        .public_key(message.sender)
        .ok_or(VerifyError::UnknownSender(message.sender))?;
    if !public_key.verify(&message.digest(), &message.signature) {
        return Err(VerifyError::InvalidSignature(message.sender));
    }

    if let Some(proof) = &message.proof {
        verify_proof(committee, proof)?;
    }
    Ok(())
}

/// Verify a proof's aggregated signature against its signers' keys.
pub fn verify_proof(committee: &Committee, proof: &QuorumProof) -> Result<(), VerifyError> {
    let invalid = |reason| VerifyError::InvalidProof {
        message_type: proof.message_type,
        reason,
    };

    let signers = committee
        .signers_of(&proof.signers)
        .ok_or(invalid("signer bitfield does not match committee"))?;
    if signers.is_empty() {
        return Err(invalid("no signers"));
    }

    let keys: Vec<PublicKey> = signers
        .iter()
        .filter_map(|&v| committee.public_key(v).cloned())
        .collect();
    if !PublicKey::verify_aggregate(&keys, &proof.digest(committee.shard()), &proof.signature) {
        return Err(invalid("aggregated signature does not verify"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbft_test_helpers::{test_block, TestCommittee};
    use fbft_types::{BlockNum, Hash, Signature, SignerBitfield, ViewId};

    #[test]
    fn test_valid_message() {
        let tc = TestCommittee::new(4);
        let (hash, body) = test_block(BlockNum(1), "a");
        let announce = tc.builder(1).announce(BlockNum(1), ViewId(0), hash, body);
        assert_eq!(verify_message(&tc.committee(), &announce), Ok(()));
    }

    #[test]
    fn test_rejects_unknown_sender_and_bad_signature() {
        let tc = TestCommittee::new(4);
        let outsider = TestCommittee::new(5);
        let hash = Hash::from_bytes(b"block");

        let vote = outsider.builder(4).prepare(BlockNum(1), ViewId(0), hash);
        assert_eq!(
            verify_message(&tc.committee(), &vote),
            Err(VerifyError::UnknownSender(ValidatorId(4)))
        );

        let mut vote = tc.builder(2).prepare(BlockNum(1), ViewId(0), hash);
        vote.block_hash = Hash::from_bytes(b"other");
        assert_eq!(
            verify_message(&tc.committee(), &vote),
            Err(VerifyError::InvalidSignature(ValidatorId(2)))
        );

        // Signed by a different member's key.
        let mut vote = tc.builder(2).prepare(BlockNum(1), ViewId(0), hash);
        vote.sender = ValidatorId(3);
        assert!(verify_message(&tc.committee(), &vote).is_err());
    }

    #[test]
    fn test_rejects_wrong_shard() {
        let tc = TestCommittee::new(4);
        let mut vote = tc.builder(0).commit(BlockNum(1), ViewId(0), Hash::from_bytes(b"b"));
        vote.shard = ShardId(9);
        assert!(matches!(
            verify_message(&tc.committee(), &vote),
            Err(VerifyError::WrongShard { .. })
        ));
    }

    #[test]
    fn test_proof_verification() {
        let tc = TestCommittee::new(4);
        let committee = tc.committee();
        let hash = Hash::from_bytes(b"block");
        let proof = tc.proof(MessageType::Prepare, BlockNum(1), ViewId(0), hash, &[0, 2, 3]);
        assert_eq!(verify_proof(&committee, &proof), Ok(()));

        // Claiming an extra signer breaks the aggregate.
        let mut forged = proof.clone();
        forged.signers = SignerBitfield::from_indices(4, [0, 1, 2, 3]);
        assert!(verify_proof(&committee, &forged).is_err());

        // Re-labelling the proof for another block breaks it too.
        let mut forged = proof.clone();
        forged.block_hash = Hash::from_bytes(b"other");
        assert!(verify_proof(&committee, &forged).is_err());

        let mut forged = proof.clone();
        forged.signature = Signature::zero();
        assert!(verify_proof(&committee, &forged).is_err());

        let mut empty = proof;
        empty.signers = SignerBitfield::new(4);
        assert!(verify_proof(&committee, &empty).is_err());
    }

    #[test]
    fn test_message_with_forged_proof_is_rejected() {
        let tc = TestCommittee::new(4);
        let hash = Hash::from_bytes(b"block");
        let mut proof = tc.proof(MessageType::Prepare, BlockNum(1), ViewId(0), hash, &[0, 1, 2]);
        proof.signers = SignerBitfield::from_indices(4, [0, 1, 3]);

        let ack = tc.builder(1).prepare_ack(proof);
        assert!(matches!(
            verify_message(&tc.committee(), &ack),
            Err(VerifyError::InvalidProof { .. })
        ));
    }
}
