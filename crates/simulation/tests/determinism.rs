//! Tests for deterministic simulation.
//!
//! The same seed must produce the same run, event for event, so that any
//! failing scenario can be replayed.

use fbft_consensus::ConsensusConfig;
use fbft_simulation::{DeliveredBlock, NetworkConfig, SimulationRunner, SimulationStats};
use std::time::Duration;
use tracing_test::traced_test;

fn test_network_config() -> NetworkConfig {
    NetworkConfig {
        num_validators: 4,
        latency: Duration::from_millis(20),
        jitter_fraction: 0.2,
        ..Default::default()
    }
}

fn run(seed: u64, crashed: Option<u32>) -> (SimulationStats, Vec<Vec<DeliveredBlock>>) {
    let mut runner =
        SimulationRunner::new(test_network_config(), ConsensusConfig::default(), seed).unwrap();
    if let Some(node) = crashed {
        runner.crash_node(node);
    }
    runner.start();
    runner.run_until(Duration::from_secs(12));

    let delivered = (0..4).map(|n| runner.delivered(n).to_vec()).collect();
    (runner.stats().clone(), delivered)
}

#[test]
fn test_simulation_runner_creation() {
    let runner =
        SimulationRunner::new(test_network_config(), ConsensusConfig::default(), 42).unwrap();

    assert!(runner.node(0).is_some());
    assert!(runner.node(3).is_some());
    assert!(runner.node(4).is_none());
    assert_eq!(runner.committee().len(), 4);
    assert_eq!(runner.now(), Duration::ZERO);
}

#[traced_test]
#[test]
fn test_determinism_same_seed() {
    let (stats1, delivered1) = run(12345, None);
    let (stats2, delivered2) = run(12345, None);

    assert!(stats1.events_processed > 0);
    assert_eq!(stats1, stats2, "Same seed should produce identical stats");
    assert_eq!(delivered1, delivered2, "Same seed should finalize the same blocks");
}

#[traced_test]
#[test]
fn test_determinism_with_view_changes() {
    let (stats1, delivered1) = run(7, Some(1));
    let (stats2, delivered2) = run(7, Some(1));

    assert!(stats1.events_dropped_crashed > 0);
    assert_eq!(stats1, stats2);
    assert_eq!(delivered1, delivered2);
}
