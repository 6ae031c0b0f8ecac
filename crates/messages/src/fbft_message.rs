//! Parsed FBFT messages.

use crate::{CodecError, ConsensusEnvelope, MessageType, QuorumProof};
use fbft_types::{consensus_digest, BlockNum, Hash, ShardId, Signature, ValidatorId, ViewId};
use thiserror::Error;

/// Errors produced while turning an envelope into an [`FbftMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The raw bytes are not a consensus envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] CodecError),

    /// A field required by the declared type is missing or inconsistent.
    #[error("malformed {message_type} message: {reason}")]
    MalformedMessage {
        message_type: MessageType,
        reason: &'static str,
    },

    /// The type tag is not part of this protocol version.
    #[error("unknown message type tag {0}")]
    UnknownMessageType(u8),
}

/// One protocol message in its in-memory form.
///
/// Immutable once built. Its index identity is
/// (`message_type`, `block_num`, `view_id`, `block_hash`, `sender`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FbftMessage {
    pub message_type: MessageType,
    pub shard: ShardId,
    pub block_num: BlockNum,
    pub view_id: ViewId,
    /// Proposed block; zero for view change votes.
    pub block_hash: Hash,
    pub sender: ValidatorId,
    /// Block body for Announce, prepared block for ViewChange/NewView, else empty.
    pub payload: Vec<u8>,
    pub proof: Option<QuorumProof>,
    pub signature: Signature,
}

impl FbftMessage {
    /// Create an unsigned message with no payload (fixtures and local bookkeeping).
    pub fn new(
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: Hash,
        sender: ValidatorId,
    ) -> Self {
        Self {
            message_type,
            shard: ShardId::BEACON,
            block_num,
            view_id,
            block_hash,
            sender,
            payload: Vec::new(),
            proof: None,
            signature: Signature::zero(),
        }
    }

    /// The digest the sender's signature must cover.
    pub fn digest(&self) -> Vec<u8> {
        consensus_digest(
            self.shard,
            self.message_type.tag(),
            self.block_num,
            self.view_id,
            &self.block_hash,
        )
    }

    /// Convert back into the wire envelope.
    pub fn to_envelope(&self) -> ConsensusEnvelope {
        ConsensusEnvelope {
            shard: self.shard,
            message_type: self.message_type.tag(),
            sender: self.sender,
            block_num: Some(self.block_num),
            view_id: Some(self.view_id),
            block_hash: Some(self.block_hash),
            payload: self.payload.clone(),
            proof: self.proof.clone(),
            signature: Some(self.signature.clone()),
        }
    }

    /// Encode straight to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.to_envelope().encode()
    }
}

/// Decode raw bytes and parse the envelope they contain.
pub fn parse_fbft_payload(bytes: &[u8]) -> Result<FbftMessage, ParseError> {
    let envelope = ConsensusEnvelope::decode(bytes)?;
    parse_fbft_message(&envelope)
}

/// Parse a consensus envelope into an [`FbftMessage`].
///
/// Dispatches on the declared type and checks that every field that type
/// requires is present and consistent. Signatures are not verified.
pub fn parse_fbft_message(envelope: &ConsensusEnvelope) -> Result<FbftMessage, ParseError> {
    let message_type = MessageType::from_tag(envelope.message_type)
        .ok_or(ParseError::UnknownMessageType(envelope.message_type))?;
    let malformed = |reason| ParseError::MalformedMessage {
        message_type,
        reason,
    };

    let block_num = envelope.block_num.ok_or(malformed("missing block number"))?;
    let view_id = envelope.view_id.ok_or(malformed("missing view id"))?;
    let signature = envelope
        .signature
        .clone()
        .ok_or(malformed("missing signature"))?;

    let block_hash = match message_type {
        MessageType::Announce => {
            let hash = require_block_hash(envelope, malformed)?;
            if envelope.payload.is_empty() {
                return Err(malformed("announce without block payload"));
            }
            // A re-proposal after a view change carries the block's prepare proof.
            if let Some(prepared) = &envelope.proof {
                if !prepared.is_for(MessageType::Prepare, block_num, prepared.view_id, &hash)
                    || prepared.view_id >= view_id
                {
                    return Err(malformed("re-proposal proof does not match block"));
                }
            }
            hash
        }
        MessageType::Prepare | MessageType::Commit => require_block_hash(envelope, malformed)?,
        MessageType::PrepareAck | MessageType::CommitAck => {
            let hash = require_block_hash(envelope, malformed)?;
            let vote_type = if message_type == MessageType::PrepareAck {
                MessageType::Prepare
            } else {
                MessageType::Commit
            };
            match &envelope.proof {
                Some(proof) if proof.is_for(vote_type, block_num, view_id, &hash) => {}
                Some(_) => return Err(malformed("proof does not match message key")),
                None => return Err(malformed("missing quorum proof")),
            }
            hash
        }
        MessageType::ViewChange => {
            if envelope.block_hash.is_some_and(|h| !h.is_zero()) {
                return Err(malformed("view change must not name a block hash"));
            }
            if let Some(prepared) = &envelope.proof {
                if prepared.message_type != MessageType::Prepare
                    || prepared.block_num != block_num
                    || prepared.view_id >= view_id
                    || prepared.block_hash.is_zero()
                {
                    return Err(malformed("prepared proof does not precede the new view"));
                }
                if envelope.payload.is_empty() {
                    return Err(malformed("prepared proof without block payload"));
                }
            }
            Hash::ZERO
        }
        MessageType::NewView => {
            let hash = envelope.block_hash.unwrap_or(Hash::ZERO);
            match &envelope.proof {
                Some(proof) if proof.is_for(MessageType::ViewChange, block_num, view_id, &Hash::ZERO) => {}
                Some(_) => return Err(malformed("proof does not match new view")),
                None => return Err(malformed("missing view change proof")),
            }
            if !hash.is_zero() && envelope.payload.is_empty() {
                return Err(malformed("re-proposal without block payload"));
            }
            hash
        }
    };

    Ok(FbftMessage {
        message_type,
        shard: envelope.shard,
        block_num,
        view_id,
        block_hash,
        sender: envelope.sender,
        payload: envelope.payload.clone(),
        proof: envelope.proof.clone(),
        signature,
    })
}

fn require_block_hash(
    envelope: &ConsensusEnvelope,
    malformed: impl Fn(&'static str) -> ParseError,
) -> Result<Hash, ParseError> {
    match envelope.block_hash {
        Some(hash) if !hash.is_zero() => Ok(hash),
        Some(_) => Err(malformed("zero block hash")),
        None => Err(malformed("missing block hash")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbft_types::SignerBitfield;

    fn vote_envelope(message_type: MessageType) -> ConsensusEnvelope {
        ConsensusEnvelope {
            shard: ShardId(0),
            message_type: message_type.tag(),
            sender: ValidatorId(1),
            block_num: Some(BlockNum(5)),
            view_id: Some(ViewId(1)),
            block_hash: Some(Hash::from_bytes(b"block")),
            payload: vec![],
            proof: None,
            signature: Some(Signature::zero()),
        }
    }

    fn proof(message_type: MessageType, view: u64, block_hash: Hash) -> QuorumProof {
        QuorumProof {
            message_type,
            block_num: BlockNum(5),
            view_id: ViewId(view),
            block_hash,
            signers: SignerBitfield::new(4),
            signature: Signature::zero(),
        }
    }

    #[test]
    fn test_parse_prepare() {
        let msg = parse_fbft_message(&vote_envelope(MessageType::Prepare)).unwrap();
        assert_eq!(msg.message_type, MessageType::Prepare);
        assert_eq!(msg.block_num, BlockNum(5));
        assert_eq!(msg.view_id, ViewId(1));
        assert_eq!(msg.sender, ValidatorId(1));
    }

    #[test]
    fn test_unknown_type_is_distinct_error() {
        let mut envelope = vote_envelope(MessageType::Prepare);
        envelope.message_type = 42;
        assert_eq!(
            parse_fbft_message(&envelope),
            Err(ParseError::UnknownMessageType(42))
        );
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let mut envelope = vote_envelope(MessageType::Commit);
        envelope.block_hash = None;
        assert!(matches!(
            parse_fbft_message(&envelope),
            Err(ParseError::MalformedMessage {
                message_type: MessageType::Commit,
                reason: "missing block hash"
            })
        ));

        let mut envelope = vote_envelope(MessageType::Prepare);
        envelope.signature = None;
        assert!(matches!(
            parse_fbft_message(&envelope),
            Err(ParseError::MalformedMessage { .. })
        ));

        // Announce needs the block body.
        let envelope = vote_envelope(MessageType::Announce);
        assert!(matches!(
            parse_fbft_message(&envelope),
            Err(ParseError::MalformedMessage {
                reason: "announce without block payload",
                ..
            })
        ));
    }

    #[test]
    fn test_ack_requires_matching_proof() {
        let hash = Hash::from_bytes(b"block");
        let mut envelope = vote_envelope(MessageType::PrepareAck);
        assert!(parse_fbft_message(&envelope).is_err());

        envelope.proof = Some(proof(MessageType::Commit, 1, hash));
        assert!(parse_fbft_message(&envelope).is_err());

        envelope.proof = Some(proof(MessageType::Prepare, 1, hash));
        assert!(parse_fbft_message(&envelope).is_ok());
    }

    #[test]
    fn test_reproposal_proof_must_match() {
        let hash = Hash::from_bytes(b"block");
        let mut envelope = vote_envelope(MessageType::Announce);
        envelope.payload = b"body".to_vec();
        envelope.view_id = Some(ViewId(3));

        envelope.proof = Some(proof(MessageType::Prepare, 1, hash));
        assert!(parse_fbft_message(&envelope).is_ok());

        envelope.proof = Some(proof(MessageType::Prepare, 1, Hash::from_bytes(b"other")));
        assert!(parse_fbft_message(&envelope).is_err());

        envelope.proof = Some(proof(MessageType::Prepare, 3, hash));
        assert!(parse_fbft_message(&envelope).is_err());
    }

    #[test]
    fn test_view_change_shape() {
        let mut envelope = vote_envelope(MessageType::ViewChange);
        envelope.view_id = Some(ViewId(2));
        // Named hash is not allowed; the prepared block travels in the proof.
        assert!(parse_fbft_message(&envelope).is_err());

        envelope.block_hash = None;
        let msg = parse_fbft_message(&envelope).unwrap();
        assert!(msg.block_hash.is_zero());

        let prepared = Hash::from_bytes(b"prepared");
        envelope.proof = Some(proof(MessageType::Prepare, 1, prepared));
        assert!(parse_fbft_message(&envelope).is_err(), "payload required");

        envelope.payload = b"block body".to_vec();
        assert!(parse_fbft_message(&envelope).is_ok());

        // Prepared proof from the same or a later view is inconsistent.
        envelope.proof = Some(proof(MessageType::Prepare, 2, prepared));
        assert!(parse_fbft_message(&envelope).is_err());
    }

    #[test]
    fn test_new_view_requires_view_change_proof() {
        let mut envelope = vote_envelope(MessageType::NewView);
        envelope.block_hash = None;
        assert!(parse_fbft_message(&envelope).is_err());

        envelope.proof = Some(proof(MessageType::ViewChange, 1, Hash::ZERO));
        let msg = parse_fbft_message(&envelope).unwrap();
        assert!(msg.block_hash.is_zero());
    }

    #[test]
    fn test_parse_payload_maps_codec_errors() {
        assert!(matches!(
            parse_fbft_payload(&[1, 2, 3]),
            Err(ParseError::MalformedEnvelope(_))
        ));
    }
}
