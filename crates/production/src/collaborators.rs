//! Interfaces to everything outside the consensus engine.
//!
//! The runner owns one implementation of each trait. Block production and
//! consumption are synchronous calls made from the runner task, so they must
//! not block; hand heavy work to another task and return.

use async_trait::async_trait;
use fbft_messages::{EquivocationEvidence, MessageType};
use fbft_types::{BlockNum, Hash, ValidatorId, ViewId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Broadcast failed: {0}")]
    Broadcast(String),
}

/// A message received from a peer, not yet decoded or verified.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Peer that delivered the bytes. The signed sender inside the message
    /// is what consensus trusts.
    pub from: ValidatorId,
    pub data: Vec<u8>,
}

/// Outbound side of the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send wire-encoded bytes to every other committee member.
    async fn broadcast(&self, message_type: MessageType, data: Vec<u8>)
        -> Result<(), TransportError>;
}

/// Source of proposals when the local validator leads a round.
pub trait BlockProducer: Send {
    /// Build a block for (block_num, view_id). `None` skips the round; the
    /// view change timer eventually moves the committee on.
    fn propose(&mut self, block_num: BlockNum, view_id: ViewId) -> Option<(Hash, Vec<u8>)>;
}

/// Sink for finalized blocks.
pub trait BlockConsumer: Send {
    fn deliver(&mut self, block_num: BlockNum, block_hash: Hash, payload: Vec<u8>);
}

/// Sink for misbehavior and stalls.
pub trait FaultReporter: Send {
    fn report_equivocation(&mut self, evidence: EquivocationEvidence);

    fn report_liveness_failure(
        &mut self,
        block_num: BlockNum,
        view_id: ViewId,
        consecutive_view_changes: u64,
    );
}

/// Fault reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFaultReporter;

impl FaultReporter for LoggingFaultReporter {
    fn report_equivocation(&mut self, evidence: EquivocationEvidence) {
        warn!(
            offender = ?evidence.offender(),
            message_type = %evidence.message_type(),
            block_num = evidence.block_num().0,
            view_id = evidence.view_id().0,
            first = ?evidence.first.block_hash,
            second = ?evidence.second.block_hash,
            "Equivocation reported"
        );
    }

    fn report_liveness_failure(
        &mut self,
        block_num: BlockNum,
        view_id: ViewId,
        consecutive_view_changes: u64,
    ) {
        warn!(
            block_num = block_num.0,
            view_id = view_id.0,
            consecutive_view_changes,
            "Liveness failure reported"
        );
    }
}

/// In-process transport connecting validators through tokio channels.
///
/// Used by the devnet binary and the runner tests.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    local: ValidatorId,
    peers: Vec<mpsc::Sender<InboundMessage>>,
}

impl LocalTransport {
    /// Build a fully connected network of `size` validators. Returns each
    /// validator's transport and inbound receiver, indexed by validator id.
    pub fn network(
        size: usize,
        capacity: usize,
    ) -> (Vec<LocalTransport>, Vec<mpsc::Receiver<InboundMessage>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::channel(capacity)).unzip();

        let transports = (0..size)
            .map(|i| LocalTransport {
                local: ValidatorId(i as u64),
                peers: senders
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, tx)| tx.clone())
                    .collect(),
            })
            .collect();
        (transports, receivers)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn broadcast(
        &self,
        message_type: MessageType,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        trace!(from = ?self.local, %message_type, bytes = data.len(), "Local broadcast");
        for peer in &self.peers {
            let message = InboundMessage {
                from: self.local,
                data: data.clone(),
            };
            // A stopped peer must not stop the rest of the network.
            if peer.send(message).await.is_err() {
                trace!(from = ?self.local, "Peer channel closed");
            }
        }
        Ok(())
    }
}
