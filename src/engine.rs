//! The propose → vote → precommit → commit round loop.
//!
//! [`ConsensusStep`] is the only task that advances height or mutates round-local state.
//! It reads shared state (lock, chain, queue, membership) and learns about network
//! traffic from the three bounded channels fed by the receiver. Anything the receiver
//! has already recorded in the lock stays visible to later phases even if the engine was
//! not waiting on the channel when it arrived.

use alloy::signers::local::PrivateKeySigner;
use std::{collections::HashSet, sync::Arc};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::{
    api::ConsensusSender,
    chain::BlockChain,
    channel::StepChannel,
    config::ConsensusConfig,
    error::{ConsensusError, ErrorKind},
    events::ConsensusEventBus,
    finder::{PreCommitFinder, ProposalFinder},
    lock::LockHandle,
    membership::Membership,
    queue::ProposalTxQueue,
    types::{Block, ConsensusEvent, Proposal, VoteMessage},
    utils::{
        block_hash, build_block, build_vote, short_hex, transaction_hash, unix_nanos_now,
    },
    validation::{validate_block, validate_block_stateful, validate_transaction},
};

/// Absolute deadlines for one round, cumulative from an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundDeadlines {
    pub propose: Instant,
    pub vote: Instant,
    pub precommit: Instant,
    /// Planned commit time; stamped into the leader's block.
    pub commit: Instant,
}

impl RoundDeadlines {
    pub fn from_anchor(anchor: Instant, config: &ConsensusConfig) -> Self {
        let delay = config.allowed_connect_delay;
        let propose = anchor + config.propose_max_calc_time + delay;
        let vote = propose + config.vote_max_calc_time + delay;
        let precommit = vote + config.precommit_max_calc_time + delay;
        let commit = precommit + config.commit_max_calc_time;
        Self {
            propose,
            vote,
            precommit,
            commit,
        }
    }
}

enum StepEvent {
    Timeout,
    Propose(Proposal),
    Vote(VoteMessage),
    PreCommit(VoteMessage),
}

pub struct ConsensusStep<S, E>
where
    S: ConsensusSender,
    E: ConsensusEventBus,
{
    config: ConsensusConfig,
    signer: PrivateKeySigner,
    pubkey: Vec<u8>,
    chain: Arc<dyn BlockChain>,
    membership: Arc<Membership>,
    queue: Arc<dyn ProposalTxQueue>,
    lock: LockHandle,
    sender: S,
    event_bus: E,
    channel: StepChannel,
    proposal_finder: ProposalFinder,
    precommit_finder: PreCommitFinder,
    current_proposal: Option<Proposal>,
    deadlines: RoundDeadlines,
}

/// Shared components an engine reads from.
pub struct StepComponents<S, E> {
    pub config: ConsensusConfig,
    pub chain: Arc<dyn BlockChain>,
    pub membership: Arc<Membership>,
    pub queue: Arc<dyn ProposalTxQueue>,
    pub lock: LockHandle,
    pub sender: S,
    pub event_bus: E,
}

impl<S, E> ConsensusStep<S, E>
where
    S: ConsensusSender,
    E: ConsensusEventBus,
{
    pub fn new(components: StepComponents<S, E>, signer: PrivateKeySigner, channel: StepChannel) -> Self {
        let StepComponents {
            config,
            chain,
            membership,
            queue,
            lock,
            sender,
            event_bus,
        } = components;
        let pubkey = signer.address().as_slice().to_vec();
        let proposal_finder = ProposalFinder::new(config.proposal_finder_limit);
        let precommit_finder = PreCommitFinder::new(config.precommit_finder_limit);
        let deadlines = RoundDeadlines::from_anchor(Instant::now(), &config);
        Self {
            config,
            signer,
            pubkey,
            chain,
            membership,
            queue,
            lock,
            sender,
            event_bus,
            channel,
            proposal_finder,
            precommit_finder,
            current_proposal: None,
            deadlines,
        }
    }

    pub fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    pub fn deadlines(&self) -> RoundDeadlines {
        self.deadlines
    }

    /// The proposal this node would vote for in the current round.
    pub fn current_proposal(&self) -> Option<&Proposal> {
        self.current_proposal.as_ref()
    }

    /// Proposals held for rounds the engine has not reached yet.
    pub fn buffered_proposals(&self) -> usize {
        self.proposal_finder.len()
    }

    /// Reset round-local state and compute deadlines from `anchor`.
    pub fn start_round(&mut self, anchor: Instant) {
        self.deadlines = RoundDeadlines::from_anchor(anchor, &self.config);
        self.current_proposal = None;
    }

    /// Drive consensus until the receiver side goes away.
    pub async fn run(mut self) -> Result<(), ConsensusError> {
        let mut anchor = Instant::now();
        loop {
            let height = self.chain.next_height();
            let mut round = 0;
            info!("Starting consensus for height {height}");
            loop {
                self.start_round(anchor);
                match self.run_round(height, round).await {
                    Ok(()) => {
                        anchor = Instant::now();
                        break;
                    }
                    Err(ConsensusError::ChannelClosed(name)) => {
                        info!("Engine stopping: {name} channel closed");
                        return Err(ConsensusError::ChannelClosed(name));
                    }
                    Err(err) => {
                        if err.kind() == ErrorKind::RoundFailure {
                            info!("Height {height} round {round} failed: {err}");
                            anchor = self.deadlines.precommit;
                        } else {
                            warn!("Height {height} round {round} aborted: {err}");
                            anchor = Instant::now();
                        }
                        self.requeue_current_proposal();
                        self.event_bus
                            .publish(ConsensusEvent::RoundFailed { height, round });
                        round += 1;
                    }
                }
            }
        }
    }

    /// One full attempt at `height`; Ok means a block was committed.
    pub async fn run_round(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        debug!("Height {height} round {round}: propose");
        self.propose(height, round).await?;
        debug!("Height {height} round {round}: vote");
        self.vote(height, round).await?;
        debug!("Height {height} round {round}: precommit");
        let proposal = self.pre_commit(height, round).await?;
        self.commit(height, round, proposal).await
    }

    pub async fn propose(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.lock.locked_proposal(height).await?.is_some() {
            debug!("Height {height} already locked, skipping propose");
            return Ok(());
        }

        let leader = self.membership.leader(height, round)?;
        if leader.pubkey == self.pubkey {
            let proposal = self.build_proposal(height, round).await?;
            info!(
                "Proposing block with {} transactions for height {height} round {round}",
                proposal.block.as_ref().map(|b| b.transactions.len()).unwrap_or_default()
            );
            self.current_proposal = Some(proposal.clone());
            if let Err(err) = self.sender.propose(proposal).await {
                warn!("Failed to broadcast proposal for height {height} round {round}: {err}");
            }
            return Ok(());
        }

        loop {
            if let Some(found) = self.proposal_finder.find(height, round) {
                self.current_proposal = Some(found.clone());
                return Ok(());
            }
            match self.next_event(self.deadlines.propose).await? {
                StepEvent::Timeout => {
                    debug!("No proposal for height {height} round {round} before deadline");
                    return Ok(());
                }
                StepEvent::Vote(_) => {
                    if self.lock.locked_proposal(height).await?.is_some() {
                        return Ok(());
                    }
                }
                event => self.absorb(event),
            }
        }
    }

    pub async fn vote(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.lock.locked_proposal(height).await?.is_some() {
            return Ok(());
        }

        let candidate = self
            .current_proposal
            .clone()
            .filter(|p| p.height() == height && p.round == round);
        if let Some(proposal) = candidate {
            match self.validate_proposal(&proposal) {
                Ok(hash) => {
                    let vote = build_vote(hash, &self.signer).await?;
                    if let Err(err) = self.sender.vote(vote).await {
                        warn!("Failed to broadcast vote for height {height} round {round}: {err}");
                    }
                }
                Err(err) => {
                    warn!("Not voting for invalid proposal at height {height} round {round}: {err}");
                }
            }
        }

        loop {
            match self.next_event(self.deadlines.vote).await? {
                StepEvent::Timeout => return Ok(()),
                event => {
                    // A proposal registered after its votes can set the lock too.
                    let may_lock = matches!(event, StepEvent::Vote(_) | StepEvent::Propose(_));
                    self.absorb(event);
                    if may_lock && self.lock.locked_proposal(height).await?.is_some() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Wait for a precommit quorum on a proposal at `height` and return that proposal.
    pub async fn pre_commit(&mut self, height: u64, round: u32) -> Result<Proposal, ConsensusError> {
        if let Some(locked) = self.lock.locked_proposal(height).await? {
            if let Some(block) = locked.block.as_ref() {
                let precommit = build_vote(block_hash(block), &self.signer).await?;
                if let Err(err) = self.sender.pre_commit(precommit).await {
                    warn!("Failed to broadcast precommit for height {height} round {round}: {err}");
                }
            }
        }

        loop {
            if let Some(hash) = self.precommit_finder.get() {
                match self.lock.find_proposal(hash.clone()).await? {
                    Some(proposal) if proposal.height() == height => return Ok(proposal),
                    Some(_) => debug!("Ignoring precommit quorum for another height"),
                    None => warn!(
                        "PreCommit quorum for unknown block {} at height {height}",
                        short_hex(&hash)
                    ),
                }
            }
            match self.next_event(self.deadlines.precommit).await? {
                StepEvent::Timeout => return Err(ConsensusError::RoundFailed { height, round }),
                event => self.absorb(event),
            }
        }
    }

    pub async fn commit(
        &mut self,
        height: u64,
        round: u32,
        proposal: Proposal,
    ) -> Result<(), ConsensusError> {
        let block = proposal
            .block
            .ok_or(ConsensusError::NothingToCommit { height })?;
        validate_block_stateful(&*self.chain, &block)?;

        let hash = block_hash(&block);
        self.chain.commit(block)?;

        self.lock.clean(height + 1).await?;
        self.proposal_finder.clear(height + 1);
        self.precommit_finder.remove(&hash);
        self.current_proposal = None;
        self.event_bus.publish(ConsensusEvent::BlockCommitted {
            height,
            round,
            block_hash: hash,
        });
        Ok(())
    }

    async fn next_event(&mut self, deadline: Instant) -> Result<StepEvent, ConsensusError> {
        tokio::select! {
            _ = sleep_until(deadline) => Ok(StepEvent::Timeout),
            proposal = self.channel.propose.recv() => proposal
                .map(StepEvent::Propose)
                .ok_or(ConsensusError::ChannelClosed("propose")),
            vote = self.channel.vote.recv() => vote
                .map(StepEvent::Vote)
                .ok_or(ConsensusError::ChannelClosed("vote")),
            precommit = self.channel.precommit.recv() => precommit
                .map(StepEvent::PreCommit)
                .ok_or(ConsensusError::ChannelClosed("precommit")),
        }
    }

    /// Keep proposals and precommits that arrive outside the phase that consumes them.
    fn absorb(&mut self, event: StepEvent) {
        match event {
            StepEvent::Propose(proposal) => {
                if let Err(err) = self.proposal_finder.set(proposal) {
                    debug!("Dropped proposal: {err}");
                }
            }
            StepEvent::PreCommit(precommit) => {
                let required = self.membership.required_accept();
                if let Err(err) = self.precommit_finder.set(&precommit, required) {
                    debug!("Dropped precommit: {err}");
                }
            }
            StepEvent::Vote(_) | StepEvent::Timeout => {}
        }
    }

    fn validate_proposal(&self, proposal: &Proposal) -> Result<Vec<u8>, ConsensusError> {
        let block = proposal.block.as_ref().ok_or(ConsensusError::EmptyProposal)?;
        validate_block(block)?;
        validate_block_stateful(&*self.chain, block)?;
        Ok(block_hash(block))
    }

    async fn build_proposal(&mut self, height: u64, round: u32) -> Result<Proposal, ConsensusError> {
        let mut transactions = Vec::new();
        let mut included = HashSet::new();
        while transactions.len() < self.config.max_block_transactions {
            let Some(tx) = self.queue.pop() else {
                break;
            };
            let hash = transaction_hash(&tx);
            if let Err(err) = validate_transaction(&tx) {
                debug!("Skipping invalid transaction {}: {err}", short_hex(&hash));
                continue;
            }
            if self.chain.find_tx(&hash).is_some() || !included.insert(hash) {
                continue;
            }
            transactions.push(tx);
        }

        let top = self.chain.top();
        let pre_block_hash = top.as_ref().map(block_hash).unwrap_or_default();
        let created_time = self.planned_commit_time(top.as_ref());
        let block = build_block(height, pre_block_hash, created_time, transactions, &self.signer).await?;
        Ok(Proposal {
            block: Some(block),
            round,
        })
    }

    /// Wall-clock estimate of the commit deadline, strictly after the chain top.
    fn planned_commit_time(&self, top: Option<&Block>) -> u64 {
        let until_commit = self.deadlines.commit.saturating_duration_since(Instant::now());
        let planned = unix_nanos_now().saturating_add(until_commit.as_nanos() as u64);
        match top {
            Some(top) => planned.max(top.created_time().saturating_add(1)),
            None => planned,
        }
    }

    /// Put back transactions of our own failed proposal so a later leader can include them.
    fn requeue_current_proposal(&mut self) {
        let Some(proposal) = self.current_proposal.take() else {
            return;
        };
        if proposal.block.as_ref().and_then(Block::signer) != Some(self.pubkey.as_slice()) {
            return;
        }
        for tx in proposal.block.into_iter().flat_map(|b| b.transactions) {
            let hash = transaction_hash(&tx);
            if self.chain.find_tx(&hash).is_some() {
                continue;
            }
            match self.queue.push(tx) {
                Ok(()) => {}
                Err(err) if err.is_duplicate() => {}
                Err(err) => warn!("Dropping transaction {} from failed proposal: {err}", short_hex(&hash)),
            }
        }
    }
}
