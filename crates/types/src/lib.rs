//! Core types for FBFT consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: Hash, BLS keys and signatures
//! - **Identifiers**: ValidatorId, ShardId, BlockNum, ViewId
//! - **Signing**: Domain-separated digests for every signed protocol message
//! - **Committee**: The roster of validators with voting power and public keys
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod committee;
mod crypto;
mod hash;
mod identifiers;
mod signer_bitfield;
mod signing;

pub use committee::{Committee, CommitteeError, ValidatorInfo};
pub use crypto::{AggregateError, KeyPair, PublicKey, Signature};
pub use hash::Hash;
pub use identifiers::{BlockNum, ShardId, ValidatorId, ViewId};
pub use signer_bitfield::SignerBitfield;
pub use signing::{consensus_digest, DOMAIN_FBFT};
