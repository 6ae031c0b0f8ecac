//! Production runner implementation.

use crate::collaborators::{
    BlockConsumer, BlockProducer, FaultReporter, InboundMessage, LoggingFaultReporter, Transport,
};
use crate::config::{NodeConfig, NodeConfigError};
use crate::ingest::ingest;
use crate::timers::{TimerFire, TimerManager};
use crate::wire;
use fbft_consensus::{ConsensusState, Phase};
use fbft_core::{Action, Event, StateMachine};
use fbft_messages::MessageType;
use fbft_types::{BlockNum, Committee, Hash, ValidatorId, ViewId};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, trace, warn};

/// Errors from the production runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Request dropped")]
    RequestDropped,

    #[error("Missing runner component: {0}")]
    MissingComponent(&'static str),

    #[error("Configuration error: {0}")]
    Config(#[from] NodeConfigError),
}

/// Point-in-time view of the consensus state, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub validator_id: ValidatorId,
    pub block_num: BlockNum,
    pub view_id: ViewId,
    pub phase: Phase,
    pub is_leader: bool,
    pub last_committed: Option<(BlockNum, Hash)>,
    pub consecutive_view_changes: u64,
    pub log_len: usize,
}

/// Handle for querying and stopping a running [`ConsensusRunner`].
///
/// Dropping the handle stops the runner.
pub struct RunnerHandle {
    status_tx: mpsc::Sender<oneshot::Sender<NodeStatus>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RunnerHandle {
    /// Query the runner's consensus state. Answered between events.
    pub async fn status(&self) -> Result<NodeStatus, RunnerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.status_tx
            .send(reply_tx)
            .await
            .map_err(|_| RunnerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RunnerError::RequestDropped)
    }

    /// Stop the runner.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Builder for [`ConsensusRunner`].
pub struct RunnerBuilder {
    config: Option<NodeConfig>,
    transport: Option<Arc<dyn Transport>>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    producer: Option<Box<dyn BlockProducer>>,
    consumer: Option<Box<dyn BlockConsumer>>,
    reporter: Box<dyn FaultReporter>,
    first_block: BlockNum,
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            inbound: None,
            producer: None,
            consumer: None,
            reporter: Box::new(LoggingFaultReporter),
            first_block: BlockNum(1),
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Outbound transport and the receiver of messages delivered to this node.
    pub fn network(
        mut self,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        self.transport = Some(transport);
        self.inbound = Some(inbound);
        self
    }

    pub fn block_producer(mut self, producer: impl BlockProducer + 'static) -> Self {
        self.producer = Some(Box::new(producer));
        self
    }

    pub fn block_consumer(mut self, consumer: impl BlockConsumer + 'static) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    /// Replace the default logging fault reporter.
    pub fn fault_reporter(mut self, reporter: impl FaultReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// First block number to run consensus for (default 1).
    pub fn first_block(mut self, block_num: BlockNum) -> Self {
        self.first_block = block_num;
        self
    }

    pub fn build(self) -> Result<(ConsensusRunner, RunnerHandle), RunnerError> {
        let config = self.config.ok_or(RunnerError::MissingComponent("config"))?;
        let transport = self
            .transport
            .ok_or(RunnerError::MissingComponent("transport"))?;
        let inbound_rx = self.inbound.ok_or(RunnerError::MissingComponent("inbound"))?;
        let producer = self
            .producer
            .ok_or(RunnerError::MissingComponent("block producer"))?;
        let consumer = self
            .consumer
            .ok_or(RunnerError::MissingComponent("block consumer"))?;

        config.validate()?;
        let committee = Arc::new(config.committee()?);
        let state = ConsensusState::new(
            config.message_builder()?,
            Arc::clone(&committee),
            config.consensus.clone(),
            self.first_block,
        );

        let (timer_tx, timer_rx) = mpsc::channel(16);
        let verify_permits = Arc::new(Semaphore::new(config.max_pending_verifications.max(1)));
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let runner = ConsensusRunner {
            state,
            committee,
            transport,
            producer,
            consumer,
            reporter: self.reporter,
            timers: TimerManager::new(timer_tx),
            timer_rx,
            inbound_rx,
            verify_permits,
            callback_tx,
            callback_rx,
            status_rx,
            shutdown_rx,
            start_time: Instant::now(),
        };
        let handle = RunnerHandle {
            status_tx,
            shutdown_tx: Some(shutdown_tx),
        };
        Ok((runner, handle))
    }
}

/// Owns one validator's consensus state machine and drives it from
/// network, timer and collaborator events.
pub struct ConsensusRunner {
    state: ConsensusState,
    committee: Arc<Committee>,
    transport: Arc<dyn Transport>,
    producer: Box<dyn BlockProducer>,
    consumer: Box<dyn BlockConsumer>,
    reporter: Box<dyn FaultReporter>,
    timers: TimerManager,
    /// Timer fires. Dedicated channel so a network flood never delays them.
    timer_rx: mpsc::Receiver<TimerFire>,
    /// Raw inbound messages, verified off the runner task.
    inbound_rx: mpsc::Receiver<InboundMessage>,
    /// One permit per inbound message between `inbound_rx` and the state
    /// machine. When none are left, inbound messages wait in `inbound_rx`.
    verify_permits: Arc<Semaphore>,
    /// Verified messages (with their permit) and proposals. Unbounded so
    /// blocking-pool tasks never block; its depth is capped by the permits.
    callback_tx: mpsc::UnboundedSender<(Event, Option<OwnedSemaphorePermit>)>,
    callback_rx: mpsc::UnboundedReceiver<(Event, Option<OwnedSemaphorePermit>)>,
    status_rx: mpsc::Receiver<oneshot::Sender<NodeStatus>>,
    shutdown_rx: oneshot::Receiver<()>,
    start_time: Instant,
}

impl ConsensusRunner {
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::new()
    }

    pub fn validator_id(&self) -> ValidatorId {
        self.state.validator_id()
    }

    /// Run until shutdown.
    ///
    /// Event sources are polled in priority order: shutdown, timers,
    /// verified messages and proposals, raw inbound messages, status queries.
    pub async fn run(mut self) -> Result<(), RunnerError> {
        info!(
            validator = ?self.state.validator_id(),
            block_num = self.state.block_num().0,
            committee_size = self.committee.len(),
            "Starting consensus runner"
        );

        // Broadcasts leave in the order consensus produced them.
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<(MessageType, Vec<u8>)>();
        let transport = Arc::clone(&self.transport);
        let outbound_task = tokio::spawn(async move {
            while let Some((message_type, data)) = outbound_rx.recv().await {
                if let Err(e) = transport.broadcast(message_type, data).await {
                    warn!(error = %e, %message_type, "Broadcast failed");
                }
            }
        });

        self.state.set_time(self.start_time.elapsed());
        let actions = self.state.start();
        self.process_actions(actions, &outbound_tx);

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(fire) = self.timer_rx.recv() => {
                    if let Some(event) = self.timers.accept(fire) {
                        self.dispatch_event(event, &outbound_tx);
                    }
                }

                Some((event, _permit)) = self.callback_rx.recv() => {
                    self.dispatch_event(event, &outbound_tx);
                }

                Some((permit, inbound)) = next_inbound(&self.verify_permits, &mut self.inbound_rx) => {
                    self.spawn_ingest(permit, inbound);
                }

                Some(reply) = self.status_rx.recv() => {
                    let _ = reply.send(self.status());
                }

                else => {
                    info!("All event sources closed");
                    break;
                }
            }
        }

        self.timers.cancel_all();
        drop(outbound_tx);
        if let Err(e) = outbound_task.await {
            error!(error = ?e, "Outbound task failed");
        }
        info!(validator = ?self.state.validator_id(), "Consensus runner stopped");
        Ok(())
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            validator_id: self.state.validator_id(),
            block_num: self.state.block_num(),
            view_id: self.state.view_id(),
            phase: self.state.phase(),
            is_leader: self.state.is_leader(),
            last_committed: self.state.last_committed(),
            consecutive_view_changes: self.state.consecutive_view_changes(),
            log_len: self.state.log().len(),
        }
    }

    /// Decode, parse and verify on the blocking pool; only verified messages
    /// come back to the state machine. The permit travels with the message
    /// and is released once the state machine has handled it.
    fn spawn_ingest(&self, permit: OwnedSemaphorePermit, inbound: InboundMessage) {
        let committee = Arc::clone(&self.committee);
        let callback_tx = self.callback_tx.clone();
        tokio::task::spawn_blocking(move || match ingest(&committee, &inbound.data) {
            Ok(message) => {
                let event = Event::MessageReceived {
                    message: Arc::new(message),
                };
                if callback_tx.send((event, Some(permit))).is_err() {
                    trace!(from = ?inbound.from, "Runner stopped before verified message arrived");
                }
            }
            Err(e) => {
                debug!(from = ?inbound.from, error = %e, "Dropping inbound message");
            }
        });
    }

    #[instrument(level = "debug", skip_all, fields(
        event = event.type_name(),
        validator = self.state.validator_id().0,
    ))]
    fn dispatch_event(
        &mut self,
        event: Event,
        outbound_tx: &mpsc::UnboundedSender<(MessageType, Vec<u8>)>,
    ) {
        self.state.set_time(self.start_time.elapsed());
        let actions = self.state.handle(event);
        self.process_actions(actions, outbound_tx);
    }

    fn process_actions(
        &mut self,
        actions: Vec<Action>,
        outbound_tx: &mpsc::UnboundedSender<(MessageType, Vec<u8>)>,
    ) {
        for action in actions {
            self.process_action(action, outbound_tx);
        }
    }

    fn process_action(
        &mut self,
        action: Action,
        outbound_tx: &mpsc::UnboundedSender<(MessageType, Vec<u8>)>,
    ) {
        match action {
            Action::Broadcast { message } => match wire::encode_message(&message) {
                Ok(data) => {
                    if outbound_tx.send((message.message_type(), data)).is_err() {
                        warn!(message_type = message.type_name(), "Outbound channel closed");
                    }
                }
                Err(e) => {
                    error!(error = %e, message_type = message.type_name(), "Failed to encode message");
                }
            },

            Action::SetTimer { id, duration } => self.timers.set_timer(id, duration),

            Action::RequestProposal { block_num, view_id } => {
                match self.producer.propose(block_num, view_id) {
                    Some((block_hash, payload)) => {
                        let event = Event::ProposalReady {
                            block_num,
                            view_id,
                            block_hash,
                            payload,
                        };
                        if self.callback_tx.send((event, None)).is_err() {
                            warn!(block_num = block_num.0, "Callback channel closed");
                        }
                    }
                    None => debug!(
                        block_num = block_num.0,
                        view_id = view_id.0,
                        "Block producer has nothing to propose"
                    ),
                }
            }

            Action::DeliverBlock {
                block_num,
                view_id,
                block_hash,
                payload,
            } => {
                debug!(
                    block_num = block_num.0,
                    view_id = view_id.0,
                    block_hash = ?block_hash,
                    bytes = payload.len(),
                    "Delivering block"
                );
                self.consumer.deliver(block_num, block_hash, payload);
            }

            Action::ReportFault { evidence } => self.reporter.report_equivocation(evidence),

            Action::ReportLivenessFailure {
                block_num,
                view_id,
                consecutive_view_changes,
            } => self
                .reporter
                .report_liveness_failure(block_num, view_id, consecutive_view_changes),
        }
    }
}

/// Wait for a free verification slot, then for the next inbound message.
///
/// Both waits are cancel safe: a permit dropped before a message arrives goes
/// back to the semaphore, and `recv` loses nothing when cancelled.
async fn next_inbound(
    permits: &Arc<Semaphore>,
    inbound_rx: &mut mpsc::Receiver<InboundMessage>,
) -> Option<(OwnedSemaphorePermit, InboundMessage)> {
    let permit = Arc::clone(permits).acquire_owned().await.ok()?;
    let inbound = inbound_rx.recv().await?;
    Some((permit, inbound))
}
