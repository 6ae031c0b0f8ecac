//! Domain-separated signing digests for consensus messages.
//!
//! Every FBFT message is signed over the canonical digest of its index key.
//! The digest is prefixed with a domain tag and bound to the shard so that a
//! signature from one shard or message type can never be replayed as another.
//!
//! # Format
//!
//! ```text
//! "fbft:" || shard (u64 le) || message type tag (u8) || block num (u64 le)
//!         || view id (u64 le) || block hash (32 bytes)
//! ```
//!
//! Because Prepare and Commit votes for the same block produce different
//! digests, quorum proofs aggregate only signatures of a single phase.

use crate::{BlockNum, Hash, ShardId, ViewId};

/// Domain tag for FBFT consensus messages.
pub const DOMAIN_FBFT: &[u8] = b"fbft:";

/// Build the signing digest for a consensus message.
pub fn consensus_digest(
    shard: ShardId,
    message_type_tag: u8,
    block_num: BlockNum,
    view_id: ViewId,
    block_hash: &Hash,
) -> Vec<u8> {
    // 5 (tag) + 8 (shard) + 1 (type) + 8 (block) + 8 (view) + 32 (hash) = 62 bytes
    let mut message = Vec::with_capacity(62);
    message.extend_from_slice(DOMAIN_FBFT);
    message.extend_from_slice(&shard.0.to_le_bytes());
    message.push(message_type_tag);
    message.extend_from_slice(&block_num.0.to_le_bytes());
    message.extend_from_slice(&view_id.0.to_le_bytes());
    message.extend_from_slice(block_hash.as_bytes());
    message
}
