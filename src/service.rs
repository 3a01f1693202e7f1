use alloy::signers::local::PrivateKeySigner;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::info;

use crate::{
    api::ConsensusSender,
    chain::{BlockChain, InMemoryBlockChain},
    channel::consensus_channels,
    client::ClientGateService,
    config::ConsensusConfig,
    engine::{ConsensusStep, StepComponents},
    error::ConsensusError,
    events::{BroadcastEventBus, ConsensusEventBus},
    lock::{LockHandle, LockState},
    membership::Membership,
    pool::ReceiverPool,
    queue::{InMemoryProposalTxQueue, ProposalTxQueue},
    receiver::ConsensusReceiverService,
    types::Block,
};

/// All shared state of one consensus node.
///
/// Cloning is cheap and every clone refers to the same node. The node has exactly one
/// engine; [`ConsensusService::start`] hands it out together with the receiver feeding it.
pub struct ConsensusService<S, E>
where
    S: ConsensusSender,
    E: ConsensusEventBus,
{
    config: ConsensusConfig,
    chain: Arc<dyn BlockChain>,
    membership: Arc<Membership>,
    queue: Arc<dyn ProposalTxQueue>,
    pool: Arc<ReceiverPool>,
    lock: LockHandle,
    sender: S,
    event_bus: E,
    started: Arc<AtomicBool>,
}

impl<S, E> Clone for ConsensusService<S, E>
where
    S: ConsensusSender,
    E: ConsensusEventBus,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            chain: Arc::clone(&self.chain),
            membership: Arc::clone(&self.membership),
            queue: Arc::clone(&self.queue),
            pool: Arc::clone(&self.pool),
            lock: self.lock.clone(),
            sender: self.sender.clone(),
            event_bus: self.event_bus.clone(),
            started: Arc::clone(&self.started),
        }
    }
}

pub type DefaultConsensusService<S> = ConsensusService<S, BroadcastEventBus>;

impl<S> DefaultConsensusService<S>
where
    S: ConsensusSender,
{
    /// In-memory chain bootstrapped from `genesis`, in-memory queue, broadcast event bus.
    pub fn new(
        config: ConsensusConfig,
        membership: Membership,
        genesis: Block,
        sender: S,
    ) -> Result<Self, ConsensusError> {
        let queue = InMemoryProposalTxQueue::new(config.queue_limit);
        Self::new_with_components(
            config,
            Arc::new(InMemoryBlockChain::with_genesis(genesis)?),
            Arc::new(membership),
            Arc::new(queue),
            sender,
            BroadcastEventBus::default(),
        )
    }
}

impl<S, E> ConsensusService<S, E>
where
    S: ConsensusSender,
    E: ConsensusEventBus,
{
    /// Spawns the lock task, so this must run inside a tokio runtime.
    pub fn new_with_components(
        config: ConsensusConfig,
        chain: Arc<dyn BlockChain>,
        membership: Arc<Membership>,
        queue: Arc<dyn ProposalTxQueue>,
        sender: S,
        event_bus: E,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        let lock = LockHandle::spawn(
            LockState::new(Arc::clone(&membership), &config),
            config.lock_voted_limit,
        );
        let pool = Arc::new(ReceiverPool::new(&config));
        Ok(Self {
            config,
            chain,
            membership,
            queue,
            pool,
            lock,
            sender,
            event_bus,
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<dyn BlockChain> {
        &self.chain
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn queue(&self) -> &Arc<dyn ProposalTxQueue> {
        &self.queue
    }

    pub fn pool(&self) -> &Arc<ReceiverPool> {
        &self.pool
    }

    pub fn lock(&self) -> &LockHandle {
        &self.lock
    }

    pub fn subscribe_to_events(&self) -> E::Receiver {
        self.event_bus.subscribe()
    }

    pub fn client_gate(&self) -> ClientGateService<S> {
        ClientGateService::new(self.sender.clone())
    }

    /// Create the engine for this node and the receiver that feeds it.
    ///
    /// Fails if called twice on the same node.
    pub fn start(
        &self,
        signer: PrivateKeySigner,
    ) -> Result<(ConsensusReceiverService<S>, ConsensusStep<S, E>), ConsensusError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConsensusError::InvalidConfiguration(
                "consensus engine already started".to_string(),
            ));
        }

        let (receive_channel, step_channel) = consensus_channels(&self.config);
        let receiver = ConsensusReceiverService::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.membership),
            self.lock.clone(),
            Arc::clone(&self.pool),
            self.sender.clone(),
            receive_channel,
        );
        let engine = ConsensusStep::new(
            StepComponents {
                config: self.config.clone(),
                chain: Arc::clone(&self.chain),
                membership: Arc::clone(&self.membership),
                queue: Arc::clone(&self.queue),
                lock: self.lock.clone(),
                sender: self.sender.clone(),
                event_bus: self.event_bus.clone(),
            },
            signer,
            step_channel,
        );
        info!(
            "Consensus node started with {} peers at height {}",
            self.membership.size(),
            self.chain.next_height()
        );
        Ok((receiver, engine))
    }
}
