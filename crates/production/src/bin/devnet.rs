//! FBFT Devnet
//!
//! Runs a committee of validators in one process, connected by in-memory
//! channels, until a number of blocks is finalized.
//!
//! # Usage
//!
//! ```bash
//! # Four validators, ten blocks
//! fbft-devnet --validators 4 --blocks 10
//!
//! # Leave validator 1 offline to exercise view changes
//! fbft-devnet --validators 4 --blocks 10 --offline 1
//!
//! # Override consensus parameters
//! fbft-devnet --consensus consensus.toml
//! ```
//!
//! The consensus file holds the same keys as the `[consensus]` section of a
//! node configuration:
//!
//! ```toml
//! view_change_timeout_ms = 1000
//! liveness_failure_threshold = 3
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use fbft_consensus::ConsensusConfig;
use fbft_production::{
    init_logging, BlockConsumer, BlockProducer, ConsensusRunner, LocalTransport, NodeConfig,
};
use fbft_types::{BlockNum, Hash, ValidatorId, ViewId};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// FBFT Devnet
///
/// Runs an in-process committee until the requested number of blocks is final.
#[derive(Parser, Debug)]
#[command(name = "fbft-devnet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Committee size
    #[arg(long, default_value_t = 4)]
    validators: usize,

    /// Blocks to finalize before exiting
    #[arg(long, default_value_t = 10)]
    blocks: u64,

    /// Validators to leave offline (can be specified multiple times)
    #[arg(long)]
    offline: Vec<usize>,

    /// Consensus parameters (TOML)
    #[arg(long)]
    consensus: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Proposes small synthetic blocks.
struct SyntheticProducer {
    validator: ValidatorId,
}

impl BlockProducer for SyntheticProducer {
    fn propose(&mut self, block_num: BlockNum, view_id: ViewId) -> Option<(Hash, Vec<u8>)> {
        let payload = format!(
            "block {} view {} from validator {}",
            block_num.0, view_id.0, self.validator.0
        )
        .into_bytes();
        Some((Hash::from_bytes(&payload), payload))
    }
}

/// Forwards finalized blocks to the main task.
struct ChannelConsumer {
    validator: ValidatorId,
    tx: mpsc::UnboundedSender<(ValidatorId, BlockNum, Hash)>,
}

impl BlockConsumer for ChannelConsumer {
    fn deliver(&mut self, block_num: BlockNum, block_hash: Hash, _payload: Vec<u8>) {
        let _ = self.tx.send((self.validator, block_num, block_hash));
    }
}

fn load_consensus_config(path: Option<&PathBuf>) -> Result<ConsensusConfig> {
    let Some(path) = path else {
        return Ok(ConsensusConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: ConsensusConfig =
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    if cli.validators == 0 {
        bail!("committee needs at least one validator");
    }
    if let Some(&bad) = cli.offline.iter().find(|&&i| i >= cli.validators) {
        bail!("offline validator {bad} is outside a committee of {}", cli.validators);
    }
    let consensus = load_consensus_config(cli.consensus.as_ref())?;

    info!(
        validators = cli.validators,
        offline = ?cli.offline,
        blocks = cli.blocks,
        "FBFT devnet starting"
    );

    let (transports, receivers) = LocalTransport::network(cli.validators, 1024);
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();
    let mut handles = Vec::new();
    let mut tasks = Vec::new();

    for (index, (transport, inbound)) in transports.into_iter().zip(receivers).enumerate() {
        if cli.offline.contains(&index) {
            continue;
        }
        let validator = ValidatorId(index as u64);
        let (runner, handle) = ConsensusRunner::builder()
            .config(NodeConfig::devnet(index, cli.validators, consensus.clone()))
            .network(Arc::new(transport), inbound)
            .block_producer(SyntheticProducer { validator })
            .block_consumer(ChannelConsumer {
                validator,
                tx: delivered_tx.clone(),
            })
            .build()
            .with_context(|| format!("building validator {index}"))?;
        handles.push(handle);
        tasks.push(tokio::spawn(runner.run()));
    }
    drop(delivered_tx);

    let online = handles.len();
    let mut finalized: BTreeMap<BlockNum, (Hash, usize)> = BTreeMap::new();
    let deadline = tokio::time::sleep(Duration::from_secs(cli.timeout_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(finalized = finalized.len(), "Devnet timed out");
                break;
            }
            delivered = delivered_rx.recv() => {
                let Some((validator, block_num, block_hash)) = delivered else {
                    break;
                };
                let entry = finalized.entry(block_num).or_insert((block_hash, 0));
                if entry.0 != block_hash {
                    bail!(
                        "validator {} finalized {block_hash} at {block_num}, others finalized {}",
                        validator.0,
                        entry.0
                    );
                }
                entry.1 += 1;
                if entry.1 == online {
                    info!(block_num = block_num.0, block_hash = %block_hash, "Block final on every online validator");
                }
                let done = finalized
                    .range(BlockNum(1)..=BlockNum(cli.blocks))
                    .filter(|(_, (_, count))| *count == online)
                    .count() as u64;
                if done >= cli.blocks {
                    break;
                }
            }
        }
    }

    for handle in &handles {
        if let Ok(status) = handle.status().await {
            info!(
                validator = ?status.validator_id,
                block_num = status.block_num.0,
                view_id = status.view_id.0,
                log_len = status.log_len,
                "Final status"
            );
        }
    }
    for handle in handles {
        handle.shutdown();
    }
    for task in tasks {
        task.await??;
    }

    let complete = (1..=cli.blocks).all(|n| {
        finalized
            .get(&BlockNum(n))
            .is_some_and(|(_, count)| *count == online)
    });
    if !complete {
        bail!("devnet did not finalize {} blocks", cli.blocks);
    }
    info!(blocks = cli.blocks, "Devnet finished");
    Ok(())
}
