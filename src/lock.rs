//! Per-height vote tracking that produces the locked proposal.
//!
//! [`LockState`] is a plain state machine. At runtime it is owned by a single task and
//! reached through [`LockHandle`], so each register/vote call runs its eligibility check
//! and its update as one step with no interleaving.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::{
    config::ConsensusConfig,
    error::ConsensusError,
    membership::Membership,
    types::{Proposal, VoteMessage},
    utils::{block_hash, short_hex},
};

pub struct LockState {
    membership: Arc<Membership>,
    registered_limit: usize,
    voted_limit: usize,
    /// Proposals by block hash, with insertion order for eviction.
    registered: HashMap<Vec<u8>, Proposal>,
    registered_order: VecDeque<Vec<u8>>,
    /// Distinct voters per block hash, with insertion order for eviction.
    votes: HashMap<Vec<u8>, HashSet<Vec<u8>>>,
    votes_order: VecDeque<Vec<u8>>,
    locked: BTreeMap<u64, Proposal>,
    /// Heights below this were cleaned and are ignored.
    floor: u64,
}

impl LockState {
    pub fn new(membership: Arc<Membership>, config: &ConsensusConfig) -> Self {
        Self {
            membership,
            registered_limit: config.lock_registered_limit,
            voted_limit: config.lock_voted_limit,
            registered: HashMap::new(),
            registered_order: VecDeque::new(),
            votes: HashMap::new(),
            votes_order: VecDeque::new(),
            locked: BTreeMap::new(),
            floor: 0,
        }
    }

    /// Remember a proposal. Returns true when it became the lock for its height.
    pub fn register_proposal(&mut self, proposal: Proposal) -> Result<bool, ConsensusError> {
        let block = proposal.block.as_ref().ok_or(ConsensusError::EmptyProposal)?;
        let hash = block_hash(block);
        if self.registered.contains_key(&hash) {
            return Err(ConsensusError::ProposalAlreadyRegistered(short_hex(&hash)));
        }
        if proposal.height() < self.floor {
            debug!(
                "Ignoring proposal for cleaned height {} (floor {})",
                proposal.height(),
                self.floor
            );
            return Ok(false);
        }

        while self.registered_order.len() >= self.registered_limit {
            match self.registered_order.pop_front() {
                Some(oldest) => {
                    self.registered.remove(&oldest);
                }
                None => break,
            }
        }
        self.registered_order.push_back(hash.clone());
        self.registered.insert(hash.clone(), proposal);
        Ok(self.evaluate(&hash))
    }

    /// Count a vote. Returns true when it made its proposal the lock.
    pub fn add_vote(&mut self, vote: VoteMessage) -> Result<bool, ConsensusError> {
        let voter = vote.voter().ok_or(ConsensusError::EmptyVote)?.to_vec();
        if vote.block_hash.is_empty() {
            return Err(ConsensusError::EmptyVote);
        }
        if !self.membership.contains(&voter) {
            return Err(ConsensusError::UnknownPeer(short_hex(&voter)));
        }

        let hash = vote.block_hash;
        if !self.votes.contains_key(&hash) {
            while self.votes_order.len() >= self.voted_limit {
                match self.votes_order.pop_front() {
                    Some(oldest) => {
                        self.votes.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.votes_order.push_back(hash.clone());
        }

        let voters = self.votes.entry(hash.clone()).or_default();
        if !voters.insert(voter) {
            return Err(ConsensusError::DuplicateVote);
        }
        Ok(self.evaluate(&hash))
    }

    /// Lock the proposal for `hash` if it has a quorum and beats any current lock's round.
    fn evaluate(&mut self, hash: &[u8]) -> bool {
        let Some(proposal) = self.registered.get(hash) else {
            return false;
        };
        let count = self.votes.get(hash).map(HashSet::len).unwrap_or_default();
        if count < self.membership.required_accept() {
            return false;
        }

        let height = proposal.height();
        if let Some(current) = self.locked.get(&height) {
            if proposal.round <= current.round {
                return false;
            }
        }

        info!(
            "Locked proposal {} at height {height} round {} with {count} votes",
            short_hex(hash),
            proposal.round
        );
        self.locked.insert(height, proposal.clone());
        true
    }

    pub fn locked_proposal(&self, height: u64) -> Option<Proposal> {
        self.locked.get(&height).cloned()
    }

    /// Registered or locked proposal whose block hashes to `hash`.
    pub fn find_proposal(&self, hash: &[u8]) -> Option<Proposal> {
        self.registered.get(hash).cloned().or_else(|| {
            self.locked
                .values()
                .find(|p| p.block.as_ref().map(block_hash).as_deref() == Some(hash))
                .cloned()
        })
    }

    pub fn vote_count(&self, hash: &[u8]) -> usize {
        self.votes.get(hash).map(HashSet::len).unwrap_or_default()
    }

    /// Drop everything that belongs to heights below `height`.
    pub fn clean(&mut self, height: u64) {
        self.floor = self.floor.max(height);
        self.locked = self.locked.split_off(&height);

        let stale: HashSet<Vec<u8>> = self
            .registered
            .iter()
            .filter(|(_, p)| p.height() < height)
            .map(|(hash, _)| hash.clone())
            .collect();
        if stale.is_empty() {
            return;
        }
        self.registered.retain(|hash, _| !stale.contains(hash));
        self.registered_order.retain(|hash| !stale.contains(hash));
        self.votes.retain(|hash, _| !stale.contains(hash));
        self.votes_order.retain(|hash| !stale.contains(hash));
        debug!("Cleaned {} proposals below height {height}", stale.len());
    }
}

enum LockCommand {
    RegisterProposal {
        proposal: Proposal,
        reply: oneshot::Sender<Result<bool, ConsensusError>>,
    },
    AddVote {
        vote: VoteMessage,
        reply: oneshot::Sender<Result<bool, ConsensusError>>,
    },
    LockedProposal {
        height: u64,
        reply: oneshot::Sender<Option<Proposal>>,
    },
    FindProposal {
        hash: Vec<u8>,
        reply: oneshot::Sender<Option<Proposal>>,
    },
    VoteCount {
        hash: Vec<u8>,
        reply: oneshot::Sender<usize>,
    },
    Clean {
        height: u64,
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable access to the lock task. The task stops once every handle is dropped.
#[derive(Clone)]
pub struct LockHandle {
    commands: mpsc::Sender<LockCommand>,
}

impl LockHandle {
    /// Spawn the task owning `state`. Must be called inside a tokio runtime.
    pub fn spawn(state: LockState, capacity: usize) -> Self {
        let (commands, receiver) = mpsc::channel(capacity);
        tokio::spawn(run_lock(state, receiver));
        Self { commands }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> LockCommand,
    ) -> Result<T, ConsensusError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ConsensusError::ChannelClosed("lock"))?;
        response
            .await
            .map_err(|_| ConsensusError::ChannelClosed("lock"))
    }

    pub async fn register_proposal(&self, proposal: Proposal) -> Result<bool, ConsensusError> {
        self.request(|reply| LockCommand::RegisterProposal { proposal, reply })
            .await?
    }

    pub async fn add_vote(&self, vote: VoteMessage) -> Result<bool, ConsensusError> {
        self.request(|reply| LockCommand::AddVote { vote, reply })
            .await?
    }

    pub async fn locked_proposal(&self, height: u64) -> Result<Option<Proposal>, ConsensusError> {
        self.request(|reply| LockCommand::LockedProposal { height, reply })
            .await
    }

    pub async fn find_proposal(&self, hash: Vec<u8>) -> Result<Option<Proposal>, ConsensusError> {
        self.request(|reply| LockCommand::FindProposal { hash, reply })
            .await
    }

    pub async fn vote_count(&self, hash: Vec<u8>) -> Result<usize, ConsensusError> {
        self.request(|reply| LockCommand::VoteCount { hash, reply })
            .await
    }

    pub async fn clean(&self, height: u64) -> Result<(), ConsensusError> {
        self.request(|reply| LockCommand::Clean { height, reply })
            .await
    }
}

async fn run_lock(mut state: LockState, mut commands: mpsc::Receiver<LockCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            LockCommand::RegisterProposal { proposal, reply } => {
                let _ = reply.send(state.register_proposal(proposal));
            }
            LockCommand::AddVote { vote, reply } => {
                let _ = reply.send(state.add_vote(vote));
            }
            LockCommand::LockedProposal { height, reply } => {
                let _ = reply.send(state.locked_proposal(height));
            }
            LockCommand::FindProposal { hash, reply } => {
                let _ = reply.send(state.find_proposal(&hash));
            }
            LockCommand::VoteCount { hash, reply } => {
                let _ = reply.send(state.vote_count(&hash));
            }
            LockCommand::Clean { height, reply } => {
                state.clean(height);
                let _ = reply.send(());
            }
        }
    }
    debug!("Lock task stopped");
}
