//! Validators running the production runner over in-memory channels.

use fbft_consensus::ConsensusConfig;
use fbft_messages::EquivocationEvidence;
use fbft_production::{
    BlockConsumer, BlockProducer, ConsensusRunner, FaultReporter, LocalTransport, NodeConfig,
    RunnerHandle,
};
use fbft_types::{BlockNum, Hash, ValidatorId, ViewId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Delivered = (ValidatorId, BlockNum, Hash);

struct Producer(ValidatorId);

impl BlockProducer for Producer {
    fn propose(&mut self, block_num: BlockNum, view_id: ViewId) -> Option<(Hash, Vec<u8>)> {
        let payload = format!("{} {} {}", block_num.0, view_id.0, self.0 .0).into_bytes();
        Some((Hash::from_bytes(&payload), payload))
    }
}

struct Consumer(ValidatorId, mpsc::UnboundedSender<Delivered>);

impl BlockConsumer for Consumer {
    fn deliver(&mut self, block_num: BlockNum, block_hash: Hash, _payload: Vec<u8>) {
        let _ = self.1.send((self.0, block_num, block_hash));
    }
}

struct LivenessCounter(mpsc::UnboundedSender<u64>);

impl FaultReporter for LivenessCounter {
    fn report_equivocation(&mut self, _evidence: EquivocationEvidence) {}

    fn report_liveness_failure(&mut self, _: BlockNum, _: ViewId, consecutive: u64) {
        let _ = self.0.send(consecutive);
    }
}

fn fast_config() -> ConsensusConfig {
    ConsensusConfig {
        view_change_timeout: Duration::from_millis(300),
        view_change_timeout_increment: Duration::from_millis(100),
        max_view_change_timeout: Duration::from_secs(2),
        liveness_failure_threshold: 1,
        ..Default::default()
    }
}

struct Network {
    handles: Vec<RunnerHandle>,
    tasks: Vec<JoinHandle<Result<(), fbft_production::RunnerError>>>,
    delivered: mpsc::UnboundedReceiver<Delivered>,
    liveness: mpsc::UnboundedReceiver<u64>,
}

fn start_network(size: usize, offline: &[usize]) -> Network {
    let (transports, receivers) = LocalTransport::network(size, 256);
    let (delivered_tx, delivered) = mpsc::unbounded_channel();
    let (liveness_tx, liveness) = mpsc::unbounded_channel();
    let mut handles = Vec::new();
    let mut tasks = Vec::new();

    for (index, (transport, inbound)) in transports.into_iter().zip(receivers).enumerate() {
        if offline.contains(&index) {
            continue;
        }
        let validator = ValidatorId(index as u64);
        let (runner, handle) = ConsensusRunner::builder()
            .config(NodeConfig::devnet(index, size, fast_config()))
            .network(Arc::new(transport), inbound)
            .block_producer(Producer(validator))
            .block_consumer(Consumer(validator, delivered_tx.clone()))
            .fault_reporter(LivenessCounter(liveness_tx.clone()))
            .build()
            .unwrap();
        handles.push(handle);
        tasks.push(tokio::spawn(runner.run()));
    }

    Network {
        handles,
        tasks,
        delivered,
        liveness,
    }
}

/// Collect deliveries until every online validator finalized `blocks` blocks.
async fn wait_for_blocks(
    network: &mut Network,
    blocks: u64,
) -> BTreeMap<BlockNum, BTreeMap<ValidatorId, Hash>> {
    let online = network.handles.len();
    let mut finalized: BTreeMap<BlockNum, BTreeMap<ValidatorId, Hash>> = BTreeMap::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while let Some((validator, block_num, hash)) = network.delivered.recv().await {
            finalized.entry(block_num).or_default().insert(validator, hash);
            let done = (1..=blocks).all(|n| {
                finalized
                    .get(&BlockNum(n))
                    .is_some_and(|by_node| by_node.len() == online)
            });
            if done {
                break;
            }
        }
    })
    .await
    .expect("blocks not finalized in time");
    finalized
}

async fn stop(network: Network) {
    for handle in network.handles {
        handle.shutdown();
    }
    for task in network.tasks {
        task.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_validators_finalize_consecutive_blocks() {
    let mut network = start_network(4, &[]);
    let finalized = wait_for_blocks(&mut network, 5).await;

    for n in 1..=5 {
        let by_node = &finalized[&BlockNum(n)];
        let first = by_node.values().next().unwrap();
        assert!(by_node.values().all(|h| h == first), "fork at block {n}");
    }

    let status = network.handles[0].status().await.unwrap();
    assert!(status.block_num > BlockNum(5));
    stop(network).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_offline_leader_is_replaced_by_view_change() {
    // Validator 1 leads block 1 at view 0.
    let mut network = start_network(4, &[1]);
    let finalized = wait_for_blocks(&mut network, 2).await;

    let by_node = &finalized[&BlockNum(1)];
    assert_eq!(by_node.len(), 3);
    let first = by_node.values().next().unwrap();
    assert!(by_node.values().all(|h| h == first));

    // Threshold 1: every view change is reported.
    assert!(network.liveness.try_recv().is_ok());
    stop(network).await;
}
