//! Inbound pipeline: decompress, parse and verify.
//!
//! Every step depends only on the bytes and the committee roster, so the
//! runner runs it on the blocking pool, many messages at a time, and only
//! verified messages reach the state machine.

use crate::wire::{self, WireError};
use fbft_consensus::{verify_message, VerifyError};
use fbft_messages::{parse_fbft_payload, FbftMessage, ParseError};
use fbft_types::Committee;
use thiserror::Error;

/// Reasons an inbound message is dropped before consensus sees it.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("wire: {0}")]
    Wire(#[from] WireError),

    #[error("parse: {0}")]
    Parse(#[from] ParseError),

    #[error("verify: {0}")]
    Verify(#[from] VerifyError),
}

/// Turn wire bytes into a verified message.
pub fn ingest(committee: &Committee, data: &[u8]) -> Result<FbftMessage, IngestError> {
    let envelope = wire::decompress(data)?;
    let message = parse_fbft_payload(&envelope)?;
    verify_message(committee, &message)?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_message;
    use fbft_core::OutboundMessage;
    use fbft_messages::MessageType;
    use fbft_test_helpers::{test_block, TestCommittee};
    use fbft_types::{BlockNum, ViewId};
    use std::sync::Arc;

    fn wire_bytes(message: FbftMessage) -> Vec<u8> {
        encode_message(&OutboundMessage::new(Arc::new(message))).unwrap()
    }

    #[test]
    fn test_ingest_valid_message() {
        let tc = TestCommittee::new(4);
        let (hash, _) = test_block(BlockNum(1), "a");
        let prepare = tc.builder(2).prepare(BlockNum(1), ViewId(0), hash);

        let ingested = ingest(&tc.committee(), &wire_bytes(prepare.clone())).unwrap();
        assert_eq!(ingested, prepare);
    }

    #[test]
    fn test_ingest_rejects_bad_signature() {
        let tc = TestCommittee::new(4);
        let (hash, _) = test_block(BlockNum(1), "a");
        let mut prepare = tc.builder(2).prepare(BlockNum(1), ViewId(0), hash);
        prepare.sender = tc.validator(3);

        assert!(matches!(
            ingest(&tc.committee(), &wire_bytes(prepare)),
            Err(IngestError::Verify(VerifyError::InvalidSignature(_)))
        ));
    }

    #[test]
    fn test_ingest_rejects_malformed_message() {
        let tc = TestCommittee::new(4);
        let mut announce = tc.builder(1).announce(
            BlockNum(1),
            ViewId(0),
            test_block(BlockNum(1), "a").0,
            b"body".to_vec(),
        );
        announce.payload.clear();

        assert!(matches!(
            ingest(&tc.committee(), &wire_bytes(announce)),
            Err(IngestError::Parse(ParseError::MalformedMessage {
                message_type: MessageType::Announce,
                ..
            }))
        ));
    }

    #[test]
    fn test_ingest_rejects_garbage() {
        let tc = TestCommittee::new(4);
        assert!(matches!(
            ingest(&tc.committee(), &[1, 2, 3]),
            Err(IngestError::Wire(_))
        ));
    }
}
