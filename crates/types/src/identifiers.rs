//! Domain-specific identifier types.

use sbor::prelude::*;
use std::fmt;

/// Validator identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
#[sbor(transparent)]
pub struct ValidatorId(pub u64);

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({})", self.0)
    }
}

/// Shard identifier. Each shard runs its own committee and consensus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
#[sbor(transparent)]
pub struct ShardId(pub u64);

impl ShardId {
    /// The beacon chain shard.
    pub const BEACON: Self = ShardId(0);
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shard({})", self.0)
    }
}

/// Block number (consensus round / chain height).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
#[sbor(transparent)]
pub struct BlockNum(pub u64);

impl BlockNum {
    /// Genesis block number.
    pub const GENESIS: Self = BlockNum(0);

    /// Get the next block number.
    pub fn next(self) -> Self {
        BlockNum(self.0 + 1)
    }

    /// Get the previous block number (returns None at genesis).
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(BlockNum)
    }
}

impl fmt::Display for BlockNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({})", self.0)
    }
}

/// View number within a block number.
///
/// Starts at zero for every block and increases strictly on each view change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
#[sbor(transparent)]
pub struct ViewId(pub u64);

impl ViewId {
    /// First view of every block.
    pub const INITIAL: Self = ViewId(0);

    /// Get the next view.
    pub fn next(self) -> Self {
        ViewId(self.0 + 1)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_num_next_prev() {
        let num = BlockNum(10);
        assert_eq!(num.next(), BlockNum(11));
        assert_eq!(num.prev(), Some(BlockNum(9)));

        assert_eq!(BlockNum::GENESIS.prev(), None);
        assert_eq!(BlockNum::GENESIS.next(), BlockNum(1));
    }

    #[test]
    fn test_view_ordering() {
        assert!(ViewId::INITIAL < ViewId::INITIAL.next());
        assert_eq!(ViewId(4).next(), ViewId(5));
    }
}
