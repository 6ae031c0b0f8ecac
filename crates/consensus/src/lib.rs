//! FBFT consensus state machine.
//!
//! This crate provides a synchronous FBFT implementation that can be used for
//! both simulation and production.
//!
//! # Architecture
//!
//! Every message received or sent is first added to the [`FbftLog`]. After
//! each event the [`ConsensusState`] re-reads the log for its current round
//! and advances as far as it can:
//!
//! - `Announce` from the round leader → vote `Prepare`
//! - `Prepare` quorum (or the leader's `PrepareAck`) → vote `Commit`
//! - `Commit` quorum (or the leader's `CommitAck`) → deliver the block
//! - `Event::ViewChangeTimer` → vote `ViewChange` for the next view
//! - `ViewChange` quorum (or the new leader's `NewView`) → enter the new view
//!
//! Quorum decisions are made by the [`QuorumDecider`] over committee voting
//! power. All I/O is performed by the runner via returned `Action`s.

mod config;
mod decider;
mod log;
mod state;
mod verification;
mod view_change;

pub use config::{ConfigError, ConsensusConfig};
pub use decider::{QuorumDecider, QuorumPolicy};
pub use log::{AddOutcome, FbftLog};
pub use state::{ConsensusState, Phase};
pub use verification::{verify_message, verify_proof, VerifyError};
pub use view_change::{
    highest_prepared, highest_view_change_quorum, PreparedBlock, ViewChangeStarted,
    ViewChangeState,
};
