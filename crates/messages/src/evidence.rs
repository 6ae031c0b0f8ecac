//! Proof of a validator signing two conflicting messages.

use crate::{FbftMessage, MessageType};
use fbft_types::{BlockNum, ValidatorId, ViewId};
use std::sync::Arc;

/// Two messages from the same sender for the same (type, block, view) that
/// name different block hashes.
///
/// `first` is the message that was indexed; `second` was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivocationEvidence {
    pub first: Arc<FbftMessage>,
    pub second: Arc<FbftMessage>,
}

impl EquivocationEvidence {
    pub fn new(first: Arc<FbftMessage>, second: Arc<FbftMessage>) -> Self {
        debug_assert_eq!(first.sender, second.sender);
        debug_assert_ne!(first.block_hash, second.block_hash);
        Self { first, second }
    }

    /// The validator that signed both messages.
    pub fn offender(&self) -> ValidatorId {
        self.first.sender
    }

    pub fn message_type(&self) -> MessageType {
        self.first.message_type
    }

    pub fn block_num(&self) -> BlockNum {
        self.first.block_num
    }

    pub fn view_id(&self) -> ViewId {
        self.first.view_id
    }
}
