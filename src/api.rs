//! Seams between the engine and the transport layer.

use crate::{
    error::ConsensusError,
    types::{ConsensusMessage, Proposal, Transaction, VoteMessage},
};

/// Outbound broadcast to every known peer, including the local node.
///
/// The engine relies on self-delivery: its own proposals, votes and precommits reach
/// the local [`ConsensusReceiver`] through the sender, exactly like a remote peer's.
/// Errors may be partial (some peers unreachable) and are never fatal to local state.
#[async_trait::async_trait]
pub trait ConsensusSender: Clone + Send + Sync + 'static {
    async fn propagate(&self, tx: Transaction) -> Result<(), ConsensusError>;
    async fn propose(&self, proposal: Proposal) -> Result<(), ConsensusError>;
    async fn vote(&self, vote: VoteMessage) -> Result<(), ConsensusError>;
    async fn pre_commit(&self, precommit: VoteMessage) -> Result<(), ConsensusError>;
}

/// Inbound entry points called by the transport for every network message.
pub trait ConsensusReceiver {
    fn propagate(&self, tx: Transaction) -> impl Future<Output = Result<(), ConsensusError>> + Send;
    fn propose(&self, proposal: Proposal)
    -> impl Future<Output = Result<(), ConsensusError>> + Send;
    fn vote(&self, vote: VoteMessage) -> impl Future<Output = Result<(), ConsensusError>> + Send;
    fn pre_commit(
        &self,
        precommit: VoteMessage,
    ) -> impl Future<Output = Result<(), ConsensusError>> + Send;

    /// Route a decoded message to its entry point.
    fn receive(
        &self,
        message: ConsensusMessage,
    ) -> impl Future<Output = Result<(), ConsensusError>> + Send
    where
        Self: Sync,
    {
        async move {
            match message {
                ConsensusMessage::Propagate(tx) => self.propagate(tx).await,
                ConsensusMessage::Propose(proposal) => self.propose(proposal).await,
                ConsensusMessage::Vote(vote) => self.vote(vote).await,
                ConsensusMessage::PreCommit(precommit) => self.pre_commit(precommit).await,
            }
        }
    }
}

/// Client ingress for new transactions.
pub trait ClientGate {
    fn gate(&self, tx: Transaction) -> impl Future<Output = Result<(), ConsensusError>> + Send;
}
