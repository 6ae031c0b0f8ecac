//! In-memory log of every consensus message, indexed by round.

use fbft_messages::{EquivocationEvidence, FbftMessage, MessageType};
use fbft_types::{BlockNum, Hash, ValidatorId, ViewId};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Index key. Block number leads so pruning is a single split.
type LogKey = (BlockNum, ViewId, MessageType, Hash);

/// One sender's slot within a round, regardless of block hash.
type SenderKey = (BlockNum, ViewId, MessageType, ValidatorId);

/// Result of adding a message to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// First message from this sender for its key.
    Inserted,
    /// Already held; nothing changed.
    Duplicate,
    /// The sender already has a message for this (type, block, view) naming a
    /// different hash. The new message was recorded as evidence only. Reported
    /// once per sender slot; later conflicts from the same slot are `Duplicate`.
    Equivocation(EquivocationEvidence),
}

#[derive(Debug, Clone)]
struct StoredBlock {
    /// Highest view the block was proposed in.
    view_id: ViewId,
    payload: Vec<u8>,
}

/// Message store owned by a single consensus instance.
///
/// Per key, one slot per distinct sender in arrival order. The first message
/// from a sender for a (type, block, view) wins; a later one with a different
/// hash is evidence, never indexed, so it cannot count toward any quorum.
#[derive(Debug, Default)]
pub struct FbftLog {
    messages: BTreeMap<LogKey, IndexMap<ValidatorId, Arc<FbftMessage>>>,
    /// First message seen per sender slot.
    first_seen: BTreeMap<SenderKey, Arc<FbftMessage>>,
    /// First conflicting message per sender slot.
    evidence: BTreeMap<SenderKey, EquivocationEvidence>,
    /// Proposed block bodies: block number -> hash -> body.
    blocks: BTreeMap<BlockNum, IndexMap<Hash, StoredBlock>>,
    len: usize,
}

impl FbftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message.
    ///
    /// Idempotent per sender. Announce messages (and NewView re-proposals)
    /// also store their block body.
    pub fn add_message(&mut self, message: impl Into<Arc<FbftMessage>>) -> AddOutcome {
        let message = message.into();
        let sender_key = (
            message.block_num,
            message.view_id,
            message.message_type,
            message.sender,
        );

        if let Some(first) = self.first_seen.get(&sender_key) {
            if first.block_hash == message.block_hash {
                return AddOutcome::Duplicate;
            }

            if self.evidence.contains_key(&sender_key) {
                return AddOutcome::Duplicate;
            }

            let evidence = EquivocationEvidence::new(first.clone(), message);
            warn!(
                offender = ?evidence.offender(),
                message_type = %evidence.message_type(),
                block_num = evidence.block_num().0,
                view_id = evidence.view_id().0,
                first = ?evidence.first.block_hash,
                second = ?evidence.second.block_hash,
                "Equivocation detected"
            );
            self.evidence.insert(sender_key, evidence.clone());
            return AddOutcome::Equivocation(evidence);
        }

        self.first_seen.insert(sender_key, message.clone());
        self.store_block(&message);
        self.messages
            .entry((
                message.block_num,
                message.view_id,
                message.message_type,
                message.block_hash,
            ))
            .or_default()
            .insert(message.sender, message);
        self.len += 1;
        AddOutcome::Inserted
    }

    fn store_block(&mut self, message: &FbftMessage) {
        let carries_block = match message.message_type {
            MessageType::Announce => true,
            MessageType::NewView => !message.block_hash.is_zero(),
            _ => false,
        };
        if !carries_block || message.payload.is_empty() {
            return;
        }

        let stored = StoredBlock {
            view_id: message.view_id,
            payload: message.payload.clone(),
        };
        self.blocks
            .entry(message.block_num)
            .or_default()
            .entry(message.block_hash)
            .and_modify(|existing| existing.view_id = existing.view_id.max(message.view_id))
            .or_insert(stored);
    }

    /// All messages for the exact key, in arrival order. Empty when absent.
    pub fn get_messages_by_type_seq_view_hash(
        &self,
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: &Hash,
    ) -> Vec<Arc<FbftMessage>> {
        self.messages
            .get(&(block_num, view_id, message_type, *block_hash))
            .map(|slots| slots.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All messages of a type for a round, across block hashes.
    pub fn get_messages_by_type_seq_view(
        &self,
        message_type: MessageType,
        block_num: BlockNum,
        view_id: ViewId,
    ) -> Vec<Arc<FbftMessage>> {
        self.messages
            .range(
                (block_num, view_id, message_type, Hash::ZERO)
                    ..=(block_num, view_id, message_type, Hash::MAX),
            )
            .flat_map(|(_, slots)| slots.values().cloned())
            .collect()
    }

    /// Views above `above` at `block_num` holding at least one message of `message_type`.
    pub fn views_with(
        &self,
        message_type: MessageType,
        block_num: BlockNum,
        above: ViewId,
    ) -> Vec<ViewId> {
        let mut views: Vec<ViewId> = self
            .messages
            .range((block_num, above, MessageType::Announce, Hash::ZERO)..)
            .take_while(|((num, _, _, _), _)| *num == block_num)
            .filter(|((_, view, ty, _), _)| *ty == message_type && *view > above)
            .map(|((_, view, _, _), _)| *view)
            .collect();
        views.dedup();
        views
    }

    /// Whether an Announce for exactly (block_num, view_id, block_hash) is held.
    pub fn has_matching_view_announce(
        &self,
        block_num: BlockNum,
        view_id: ViewId,
        block_hash: &Hash,
    ) -> bool {
        self.messages
            .get(&(block_num, view_id, MessageType::Announce, *block_hash))
            .is_some_and(|slots| !slots.is_empty())
    }

    /// Body of the block proposed in the highest view at `block_num`.
    pub fn get_block_by_num(&self, block_num: BlockNum) -> Option<&[u8]> {
        self.blocks
            .get(&block_num)?
            .values()
            .fold(None::<&StoredBlock>, |best, block| match best {
                Some(b) if b.view_id >= block.view_id => Some(b),
                _ => Some(block),
            })
            .map(|b| b.payload.as_slice())
    }

    /// Body of a specific block.
    pub fn get_block(&self, block_num: BlockNum, block_hash: &Hash) -> Option<&[u8]> {
        self.blocks
            .get(&block_num)?
            .get(block_hash)
            .map(|b| b.payload.as_slice())
    }

    /// Remove everything for blocks strictly below `block_num`.
    pub fn delete_blocks_less_than(&mut self, block_num: BlockNum) {
        let floor_key = (block_num, ViewId(0), MessageType::Announce, Hash::ZERO);
        let floor_sender = (block_num, ViewId(0), MessageType::Announce, ValidatorId(0));

        let kept = self.messages.split_off(&floor_key);
        let removed: usize = self.messages.values().map(IndexMap::len).sum();
        self.messages = kept;
        self.len -= removed;

        self.first_seen = self.first_seen.split_off(&floor_sender);
        self.evidence = self.evidence.split_off(&floor_sender);
        self.blocks = self.blocks.split_off(&block_num);

        if removed > 0 {
            debug!(below = block_num.0, removed, remaining = self.len, "Pruned log");
        }
    }

    /// All equivocation evidence still held.
    pub fn equivocation_evidence(&self) -> impl Iterator<Item = &EquivocationEvidence> {
        self.evidence.values()
    }

    /// Number of indexed messages.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
