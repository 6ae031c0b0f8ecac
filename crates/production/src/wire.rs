//! Message encoding and decoding for network transport.
//!
//! # Wire Format
//!
//! All consensus messages are SBOR-encoded envelopes, then LZ4-compressed:
//!
//! ```text
//! [u32 LE uncompressed size][LZ4 compressed SBOR envelope]
//! ```
//!
//! # Topics
//!
//! Each message type is published on its own topic so transports can route
//! and prioritize by type. The type tag inside the envelope is authoritative;
//! the topic is never trusted for dispatch.

use fbft_core::OutboundMessage;
use fbft_messages::{CodecError, MessageType};
use fbft_types::ShardId;
use thiserror::Error;

/// Largest uncompressed message accepted from the network.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

const SIZE_PREFIX: usize = 4;

/// Errors that can occur during wire encoding/decoding.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Message too short")]
    MessageTooShort,

    #[error("Message declares {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Decompression error: {0}")]
    Decompress(String),

    #[error("Envelope encode error: {0}")]
    Encode(#[from] CodecError),
}

/// LZ4-compress with the uncompressed size prepended.
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress data produced by [`compress`].
///
/// The declared size is checked before anything is allocated.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    if data.len() <= SIZE_PREFIX {
        return Err(WireError::MessageTooShort);
    }
    let mut prefix = [0u8; SIZE_PREFIX];
    prefix.copy_from_slice(&data[..SIZE_PREFIX]);
    let size = u32::from_le_bytes(prefix) as usize;
    if size > MAX_MESSAGE_SIZE {
        return Err(WireError::TooLarge {
            size,
            limit: MAX_MESSAGE_SIZE,
        });
    }

    lz4_flex::decompress_size_prepended(data).map_err(|e| WireError::Decompress(e.to_string()))
}

/// Encode an outbound message to wire format.
pub fn encode_message(message: &OutboundMessage) -> Result<Vec<u8>, WireError> {
    let envelope = message.encode()?;
    Ok(compress(&envelope))
}

/// Topic a message type is published on.
pub fn topic_for(shard: ShardId, message_type: MessageType) -> String {
    format!("consensus/{}/shard-{}/1.0.0", message_type.topic_name(), shard.0)
}
