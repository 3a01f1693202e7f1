//! Implementation of [`ConsensusReceiver`] for [`ConsensusReceiverService`].

use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    api::{ConsensusReceiver, ConsensusSender},
    channel::ReceiveChannel,
    error::{ConsensusError, collect_errors},
    lock::LockHandle,
    membership::Membership,
    pool::ReceiverPool,
    queue::ProposalTxQueue,
    types::{Proposal, Transaction, VoteMessage},
    utils::{short_hex, transaction_hash, verify_signature},
    validation::{validate_block, validate_transaction},
};

/// Validates, deduplicates and fans out inbound network messages.
pub struct ConsensusReceiverService<S>
where
    S: ConsensusSender,
{
    queue: Arc<dyn ProposalTxQueue>,
    membership: Arc<Membership>,
    lock: LockHandle,
    pool: Arc<ReceiverPool>,
    sender: S,
    channel: ReceiveChannel,
}

impl<S> Clone for ConsensusReceiverService<S>
where
    S: ConsensusSender,
{
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            membership: Arc::clone(&self.membership),
            lock: self.lock.clone(),
            pool: Arc::clone(&self.pool),
            sender: self.sender.clone(),
            channel: self.channel.clone(),
        }
    }
}

impl<S> ConsensusReceiverService<S>
where
    S: ConsensusSender,
{
    pub fn new(
        queue: Arc<dyn ProposalTxQueue>,
        membership: Arc<Membership>,
        lock: LockHandle,
        pool: Arc<ReceiverPool>,
        sender: S,
        channel: ReceiveChannel,
    ) -> Self {
        Self {
            queue,
            membership,
            lock,
            pool,
            sender,
            channel,
        }
    }

    pub fn pool(&self) -> &ReceiverPool {
        &self.pool
    }

    /// Signature over the block hash by a known peer.
    fn verify_vote(&self, vote: &VoteMessage) -> Result<(), ConsensusError> {
        let signature = vote.signature.as_ref().ok_or(ConsensusError::EmptyVote)?;
        verify_signature(signature, &vote.block_hash)?;
        if !self.membership.contains(&signature.pubkey) {
            return Err(ConsensusError::UnknownPeer(short_hex(&signature.pubkey)));
        }
        Ok(())
    }

    async fn rebroadcast<F>(&self, kind: &'static str, broadcast: F)
    where
        F: Future<Output = Result<(), ConsensusError>>,
    {
        if let Err(err) = broadcast.await {
            warn!("Failed to rebroadcast {kind}: {err}");
        }
    }
}

impl<S> ConsensusReceiver for ConsensusReceiverService<S>
where
    S: ConsensusSender,
{
    async fn propagate(&self, tx: Transaction) -> Result<(), ConsensusError> {
        validate_transaction(&tx)?;
        if self.pool.is_exist_propagate(&tx) {
            return Err(ConsensusError::DuplicateTransaction(short_hex(
                &transaction_hash(&tx),
            )));
        }

        let (queued, (), ()) = tokio::join!(
            async { self.queue.push(tx.clone()) },
            async { self.pool.set_propagate(&tx) },
            self.rebroadcast("transaction", self.sender.propagate(tx.clone())),
        );
        collect_errors([queued])
    }

    async fn propose(&self, proposal: Proposal) -> Result<(), ConsensusError> {
        let block = proposal.block.as_ref().ok_or(ConsensusError::EmptyProposal)?;
        validate_block(block)?;

        let height = block.height();
        let round = proposal.round;
        let leader = self.membership.leader(height, round)?;
        if block.signer() != Some(leader.pubkey.as_slice()) {
            return Err(ConsensusError::NotLeader { height, round });
        }
        if self.pool.is_exist_propose(&proposal) {
            return Err(ConsensusError::DuplicateProposal { height, round });
        }

        let (registered, (), ()) = tokio::join!(
            self.lock.register_proposal(proposal.clone()),
            async { self.pool.set_propose(&proposal) },
            self.rebroadcast("proposal", self.sender.propose(proposal.clone())),
        );
        let published = self.channel.publish_propose(proposal).await;
        debug!("Accepted proposal for height {height} round {round}");
        collect_errors([registered.map(|_| ()), published])
    }

    async fn vote(&self, vote: VoteMessage) -> Result<(), ConsensusError> {
        self.verify_vote(&vote)?;
        if self.pool.is_exist_vote(&vote) {
            return Err(ConsensusError::DuplicateVote);
        }

        let (counted, (), ()) = tokio::join!(
            self.lock.add_vote(vote.clone()),
            async { self.pool.set_vote(&vote) },
            self.rebroadcast("vote", self.sender.vote(vote.clone())),
        );
        let published = self.channel.publish_vote(vote).await;
        collect_errors([counted.map(|_| ()), published])
    }

    async fn pre_commit(&self, precommit: VoteMessage) -> Result<(), ConsensusError> {
        self.verify_vote(&precommit)?;
        if self.pool.is_exist_precommit(&precommit) {
            return Err(ConsensusError::DuplicatePreCommit);
        }

        let ((), ()) = tokio::join!(
            async { self.pool.set_precommit(&precommit) },
            self.rebroadcast("precommit", self.sender.pre_commit(precommit.clone())),
        );
        self.channel.publish_precommit(precommit).await
    }
}
