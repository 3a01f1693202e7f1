use tokio::sync::mpsc;

use crate::{
    config::ConsensusConfig,
    error::ConsensusError,
    types::{Proposal, VoteMessage},
};

/// Receiver side of the hand-off: publishes accepted messages to the engine.
///
/// Sends wait while a channel is full, so a slow engine pushes back on the network
/// handlers instead of losing messages.
#[derive(Clone)]
pub struct ReceiveChannel {
    propose: mpsc::Sender<Proposal>,
    vote: mpsc::Sender<VoteMessage>,
    precommit: mpsc::Sender<VoteMessage>,
}

/// Engine side of the hand-off.
pub struct StepChannel {
    pub propose: mpsc::Receiver<Proposal>,
    pub vote: mpsc::Receiver<VoteMessage>,
    pub precommit: mpsc::Receiver<VoteMessage>,
}

/// Create the three bounded channels, sized by the matching pool limits.
pub fn consensus_channels(config: &ConsensusConfig) -> (ReceiveChannel, StepChannel) {
    let (propose_tx, propose_rx) = mpsc::channel(config.propose_pool_limit);
    let (vote_tx, vote_rx) = mpsc::channel(config.vote_pool_limit);
    let (precommit_tx, precommit_rx) = mpsc::channel(config.precommit_pool_limit);
    (
        ReceiveChannel {
            propose: propose_tx,
            vote: vote_tx,
            precommit: precommit_tx,
        },
        StepChannel {
            propose: propose_rx,
            vote: vote_rx,
            precommit: precommit_rx,
        },
    )
}

impl ReceiveChannel {
    pub async fn publish_propose(&self, proposal: Proposal) -> Result<(), ConsensusError> {
        self.propose
            .send(proposal)
            .await
            .map_err(|_| ConsensusError::ChannelClosed("propose"))
    }

    pub async fn publish_vote(&self, vote: VoteMessage) -> Result<(), ConsensusError> {
        self.vote
            .send(vote)
            .await
            .map_err(|_| ConsensusError::ChannelClosed("vote"))
    }

    pub async fn publish_precommit(&self, precommit: VoteMessage) -> Result<(), ConsensusError> {
        self.precommit
            .send(precommit)
            .await
            .map_err(|_| ConsensusError::ChannelClosed("precommit"))
    }
}
