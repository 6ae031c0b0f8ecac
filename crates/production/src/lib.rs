//! Production runner with async I/O.
//!
//! Wraps the deterministic consensus state machine with real I/O:
//!
//! - Inbound messages are decompressed, parsed and signature-verified on the
//!   blocking thread pool, up to `max_pending_verifications` at a time
//! - Timers are tokio tasks
//! - Outbound messages go through a [`Transport`]
//!
//! # Architecture
//!
//! A single task owns the state machine and receives every event through
//! channels merged by one `tokio::select!` loop, so consensus sees a single
//! ordered event stream and needs no locks.
//!
//! ```text
//!   Transport ──bytes──▶ ingest (spawn_blocking) ──verified──┐
//!                        bounded by verification permits     │
//!                                                            ▼
//!   TimerManager ──────────────timer events──────────▶ ConsensusRunner ──actions──▶ Transport
//!                                                            │                     BlockProducer
//!   RunnerHandle ──────────status / shutdown─────────────────┘                     BlockConsumer
//!                                                                                  FaultReporter
//! ```

mod collaborators;
mod config;
mod ingest;
mod runner;
mod telemetry;
mod timers;
pub mod wire;

pub use collaborators::{
    BlockConsumer, BlockProducer, FaultReporter, InboundMessage, LocalTransport,
    LoggingFaultReporter, Transport, TransportError,
};
pub use config::{MemberConfig, NodeConfig, NodeConfigError, NodeSection};
pub use ingest::{ingest, IngestError};
pub use runner::{ConsensusRunner, NodeStatus, RunnerBuilder, RunnerError, RunnerHandle};
pub use telemetry::{init_logging, TelemetryError};
pub use timers::{TimerFire, TimerManager};
