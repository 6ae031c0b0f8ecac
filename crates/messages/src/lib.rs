//! Network messages for the FBFT consensus protocol.
//!
//! Messages travel as a generic [`ConsensusEnvelope`] whose fields are all
//! optional on the wire. [`parse_fbft_message`] validates an envelope against
//! its declared [`MessageType`] and produces the typed [`FbftMessage`] that the
//! consensus log indexes. Signatures are not checked here; verification needs
//! the committee roster and happens in the consensus crate.

mod builder;
mod envelope;
mod evidence;
mod fbft_message;
mod message_type;
mod proof;

pub use builder::{construct_announce_message, MessageBuilder};
pub use envelope::{CodecError, ConsensusEnvelope};
pub use evidence::EquivocationEvidence;
pub use fbft_message::{parse_fbft_message, parse_fbft_payload, FbftMessage, ParseError};
pub use message_type::MessageType;
pub use proof::QuorumProof;
