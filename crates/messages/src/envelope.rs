//! Generic consensus envelope and its SBOR codec.

use crate::QuorumProof;
use fbft_types::{BlockNum, Hash, ShardId, Signature, ValidatorId, ViewId};
use sbor::prelude::BasicSbor;
use thiserror::Error;

/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Message too short")]
    MessageTooShort,

    #[error("SBOR decode error: {0}")]
    SborDecode(String),

    #[error("SBOR encode error: {0}")]
    SborEncode(String),
}

/// The wire form of every consensus message.
///
/// The envelope knows nothing about FBFT field semantics: every protocol field
/// is optional and the type is a raw tag, so that an envelope from a newer
/// protocol version still decodes and is rejected by the parser with a precise
/// error instead of a codec failure.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ConsensusEnvelope {
    /// Shard whose committee the message belongs to.
    pub shard: ShardId,
    /// Raw message type tag (see `MessageType::tag`).
    pub message_type: u8,
    /// Validator that produced the message.
    pub sender: ValidatorId,
    pub block_num: Option<BlockNum>,
    pub view_id: Option<ViewId>,
    pub block_hash: Option<Hash>,
    /// Block body for proposals, empty for votes.
    pub payload: Vec<u8>,
    pub proof: Option<QuorumProof>,
    pub signature: Option<Signature>,
}

impl ConsensusEnvelope {
    /// SBOR-encode the envelope.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        sbor::basic_encode(self).map_err(|e| CodecError::SborEncode(format!("{:?}", e)))
    }

    /// SBOR-decode an envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::MessageTooShort);
        }
        sbor::basic_decode(bytes).map_err(|e| CodecError::SborDecode(format!("{:?}", e)))
    }
}
