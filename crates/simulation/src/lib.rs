//! Deterministic simulation runner.
//!
//! Runs a whole committee of [`fbft_consensus::ConsensusState`] machines in
//! one process on virtual time. Given the same seed, it produces identical
//! results every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Event Queue (BTreeMap<EventKey, Event>)        │ │
//! │  │     Ordered by: time, priority, node, sequence     │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     nodes: Vec<ConsensusState>                     │ │
//! │  │     Each processes events sequentially             │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Actions → SimulatedNetwork → new events        │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound messages are signature-checked before a node sees them, the same
//! way the production runner checks them at ingestion.

mod event_queue;
mod network;
mod runner;

pub use event_queue::EventKey;
pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{
    DeliveredBlock, LivenessReport, SimulationError, SimulationRunner, SimulationStats,
};

/// Position of a node in the simulated committee.
///
/// Node `i` runs as `ValidatorId(i)`. Production code only ever knows
/// validators by `ValidatorId`.
pub type NodeIndex = u32;
