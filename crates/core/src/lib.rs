//! Core types for FBFT consensus.
//!
//! This crate provides the foundational types for the consensus architecture:
//!
//! - [`Event`]: All possible inputs to the state machine
//! - [`Action`]: All possible outputs from the state machine
//! - [`EventPriority`]: Ordering priority for events at the same timestamp
//! - [`StateMachine`]: The trait that the consensus state machine implements
//!
//! # Architecture
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! All I/O is handled by the runner (simulation or production) which
//! delivers events one at a time, executes the returned actions, and turns
//! their results back into events. Inbound messages and timer fires share a
//! single event stream, so a timeout can never race a quorum.

mod action;
mod event;
mod message;
mod traits;

pub use action::Action;
pub use event::{Event, EventPriority};
pub use message::OutboundMessage;
pub use traits::StateMachine;

/// Timer identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// No commit within the view change timeout.
    ViewChange,
}
