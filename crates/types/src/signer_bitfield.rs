//! Bitfield recording which committee members contributed to a quorum proof.

use sbor::prelude::*;

/// A compact bitfield indexed by committee position.
///
/// Bitfields arrive from the network, so every accessor tolerates malformed
/// input; [`SignerBitfield::is_well_formed`] rejects it outright.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct SignerBitfield {
    bits: Vec<u8>,
    num_validators: usize,
}

impl SignerBitfield {
    /// Create a new empty bitfield for a committee of `num_validators`.
    pub fn new(num_validators: usize) -> Self {
        Self {
            bits: vec![0u8; num_validators.div_ceil(8)],
            num_validators,
        }
    }

    /// Create a bitfield with the given committee indices set.
    ///
    /// Out-of-range indices are ignored.
    pub fn from_indices(num_validators: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut bitfield = Self::new(num_validators);
        for index in indices {
            bitfield.set(index);
        }
        bitfield
    }

    /// Mark the member at `index` as a signer.
    pub fn set(&mut self, index: usize) {
        if index < self.num_validators {
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// Check if the member at `index` signed.
    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.num_validators {
            return false;
        }
        self.bits
            .get(index / 8)
            .is_some_and(|byte| (byte >> (index % 8)) & 1 == 1)
    }

    /// Number of signers.
    pub fn count(&self) -> usize {
        self.set_indices().count()
    }

    /// Committee size this bitfield was built for.
    pub fn num_validators(&self) -> usize {
        self.num_validators
    }

    /// Iterate over the committee indices that signed.
    pub fn set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_validators).filter(|&i| self.is_set(i))
    }

    /// Check that no signer is recorded.
    pub fn is_empty(&self) -> bool {
        self.set_indices().next().is_none()
    }

    /// Check the byte length matches the committee size and no padding bit is set.
    pub fn is_well_formed(&self) -> bool {
        if self.bits.len() != self.num_validators.div_ceil(8) {
            return false;
        }
        let padding = self.bits.len() * 8 - self.num_validators;
        match self.bits.last() {
            Some(&last) if padding > 0 => last >> (8 - padding) == 0,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitfield_basic() {
        let mut bf = SignerBitfield::new(10);
        assert!(bf.is_empty());

        bf.set(0);
        bf.set(5);
        bf.set(9);
        bf.set(10); // out of bounds, ignored

        assert!(bf.is_set(0));
        assert!(bf.is_set(9));
        assert!(!bf.is_set(1));
        assert!(!bf.is_set(10));
        assert_eq!(bf.count(), 3);
        assert_eq!(bf.set_indices().collect::<Vec<_>>(), vec![0, 5, 9]);
    }

    #[test]
    fn test_from_indices() {
        let bf = SignerBitfield::from_indices(4, [3, 1, 1]);
        assert_eq!(bf.set_indices().collect::<Vec<_>>(), vec![1, 3]);
        assert!(bf.is_well_formed());
    }

    #[test]
    fn test_malformed_bitfields() {
        let short = SignerBitfield {
            bits: vec![],
            num_validators: 9,
        };
        assert!(!short.is_well_formed());
        assert!(!short.is_set(0));

        let padding_set = SignerBitfield {
            bits: vec![0b1000_0000],
            num_validators: 4,
        };
        assert!(!padding_set.is_well_formed());
        assert_eq!(padding_set.count(), 0);
    }
}
