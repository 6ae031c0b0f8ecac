//! Validator node configuration.
//!
//! Example TOML:
//!
//! ```toml
//! channel_capacity = 1024
//! max_pending_verifications = 64
//!
//! [node]
//! validator_id = 0
//! shard = 0
//! key_seed = "<64 hex chars>"
//!
//! [consensus]
//! view_change_timeout_ms = 5000
//! max_future_blocks = 16
//!
//! [consensus.quorum_policy]
//! kind = "super_majority_vote"
//!
//! [[committee]]
//! validator_id = 0
//! public_key = "<hex>"
//! voting_power = 1
//! ```

use fbft_consensus::{ConfigError, ConsensusConfig};
use fbft_messages::MessageBuilder;
use fbft_types::{
    Committee, CommitteeError, Hash, KeyPair, PublicKey, ShardId, ValidatorId, ValidatorInfo,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating a node configuration.
#[derive(Debug, Error)]
pub enum NodeConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid hex in {field}: {source}")]
    Hex {
        field: &'static str,
        source: hex::FromHexError,
    },

    #[error("key seed must be 32 bytes, got {0}")]
    KeySeedLength(usize),

    #[error("invalid committee: {0}")]
    Committee(#[from] CommitteeError),

    #[error("invalid consensus config: {0}")]
    Consensus(#[from] ConfigError),

    #[error("validator {0} is not in the committee")]
    NotAMember(ValidatorId),

    #[error("configured key does not match committee key of validator {0}")]
    KeyMismatch(ValidatorId),
}

/// Node identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSection {
    pub validator_id: u64,

    #[serde(default)]
    pub shard: u64,

    /// Hex-encoded 32-byte seed for the BLS signing key.
    pub key_seed: String,
}

/// One committee member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    pub validator_id: u64,

    /// Hex-encoded compressed BLS public key.
    pub public_key: String,

    #[serde(default = "default_voting_power")]
    pub voting_power: u64,
}

fn default_voting_power() -> u64 {
    1
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_max_pending_verifications() -> usize {
    64
}

/// Top-level validator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Capacity of the runner's bounded channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Inbound messages being verified or awaiting the state machine at once.
    /// When all are in use, the runner stops reading the inbound channel.
    #[serde(default = "default_max_pending_verifications")]
    pub max_pending_verifications: usize,

    pub node: NodeSection,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Members in committee order, which fixes leader rotation.
    pub committee: Vec<MemberConfig>,
}

impl NodeConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| NodeConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, NodeConfigError> {
        let config: NodeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for member `index` of an in-process devnet of `size`
    /// validators with keys derived from a fixed seed.
    pub fn devnet(index: usize, size: usize, consensus: ConsensusConfig) -> Self {
        let committee = (0..size)
            .map(|i| MemberConfig {
                validator_id: i as u64,
                public_key: hex::encode(KeyPair::from_seed(&devnet_seed(i)).public_key().as_bytes()),
                voting_power: 1,
            })
            .collect();

        Self {
            node: NodeSection {
                validator_id: index as u64,
                shard: 0,
                key_seed: hex::encode(devnet_seed(index)),
            },
            consensus,
            committee,
            channel_capacity: default_channel_capacity(),
            max_pending_verifications: default_max_pending_verifications(),
        }
    }

    pub fn validator_id(&self) -> ValidatorId {
        ValidatorId(self.node.validator_id)
    }

    pub fn shard(&self) -> ShardId {
        ShardId(self.node.shard)
    }

    /// Check every section and that the local key matches our committee entry.
    pub fn validate(&self) -> Result<(), NodeConfigError> {
        self.consensus.validate()?;
        let committee = self.committee()?;
        let key = self.key_pair()?;

        let ours = committee
            .public_key(self.validator_id())
            .ok_or(NodeConfigError::NotAMember(self.validator_id()))?;
        if *ours != key.public_key() {
            return Err(NodeConfigError::KeyMismatch(self.validator_id()));
        }
        Ok(())
    }

    pub fn key_pair(&self) -> Result<KeyPair, NodeConfigError> {
        let bytes = hex::decode(&self.node.key_seed).map_err(|source| NodeConfigError::Hex {
            field: "node.key_seed",
            source,
        })?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| NodeConfigError::KeySeedLength(bytes.len()))?;
        Ok(KeyPair::from_seed(&seed))
    }

    pub fn committee(&self) -> Result<Committee, NodeConfigError> {
        let members = self
            .committee
            .iter()
            .map(|m| {
                let key = hex::decode(&m.public_key).map_err(|source| NodeConfigError::Hex {
                    field: "committee.public_key",
                    source,
                })?;
                Ok(ValidatorInfo {
                    validator_id: ValidatorId(m.validator_id),
                    public_key: PublicKey::from_bytes(key),
                    voting_power: m.voting_power,
                })
            })
            .collect::<Result<Vec<_>, NodeConfigError>>()?;
        Ok(Committee::new(self.shard(), members)?)
    }

    /// Message builder signing as this node.
    pub fn message_builder(&self) -> Result<MessageBuilder, NodeConfigError> {
        Ok(MessageBuilder::new(
            self.shard(),
            self.validator_id(),
            self.key_pair()?,
        ))
    }
}

fn devnet_seed(index: usize) -> [u8; 32] {
    Hash::from_parts(&[b"fbft-devnet".as_slice(), &(index as u64).to_le_bytes()]).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbft_consensus::QuorumPolicy;
    use std::time::Duration;

    fn devnet_toml(index: usize) -> String {
        toml::to_string(&NodeConfig::devnet(index, 4, ConsensusConfig::default())).unwrap()
    }

    #[test]
    fn test_devnet_config_round_trips_through_toml() {
        let config = NodeConfig::from_toml_str(&devnet_toml(2)).unwrap();
        assert_eq!(config.validator_id(), ValidatorId(2));
        assert_eq!(config.committee().unwrap().len(), 4);
        assert_eq!(config.consensus, ConsensusConfig::default());
    }

    #[test]
    fn test_consensus_section_overrides() {
        let mut table: toml::Table = toml::from_str(&devnet_toml(0)).unwrap();
        let consensus: toml::Table = toml::from_str("max_future_blocks = 4").unwrap();
        table.insert("consensus".into(), toml::Value::Table(consensus));

        let config = NodeConfig::from_toml_str(&toml::to_string(&table).unwrap()).unwrap();
        assert_eq!(config.consensus.max_future_blocks, 4);
        assert_eq!(config.consensus.view_change_timeout, Duration::from_secs(5));
        assert_eq!(config.consensus.quorum_policy, QuorumPolicy::SuperMajorityVote);
        assert_eq!(config.channel_capacity, 1024);
        assert_eq!(config.max_pending_verifications, 64);
    }

    #[test]
    fn test_key_must_match_committee_entry() {
        let mut config = NodeConfig::devnet(0, 4, ConsensusConfig::default());
        config.node.key_seed = hex::encode([7u8; 32]);
        assert!(matches!(
            config.validate(),
            Err(NodeConfigError::KeyMismatch(ValidatorId(0)))
        ));
    }

    #[test]
    fn test_non_member_is_rejected() {
        let mut config = NodeConfig::devnet(0, 4, ConsensusConfig::default());
        config.node.validator_id = 9;
        assert!(matches!(
            config.validate(),
            Err(NodeConfigError::NotAMember(ValidatorId(9)))
        ));
    }

    #[test]
    fn test_bad_seed() {
        let mut config = NodeConfig::devnet(0, 4, ConsensusConfig::default());
        config.node.key_seed = "abcd".into();
        assert!(matches!(
            config.key_pair(),
            Err(NodeConfigError::KeySeedLength(2))
        ));
        config.node.key_seed = "zz".into();
        assert!(matches!(config.key_pair(), Err(NodeConfigError::Hex { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            NodeConfig::load("/nonexistent/fbft-node.toml"),
            Err(NodeConfigError::Io { .. })
        ));
    }
}
