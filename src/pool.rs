use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

use crate::{
    config::ConsensusConfig,
    types::{Proposal, Transaction, VoteMessage},
    utils::{proposal_fingerprint, transaction_hash, vote_fingerprint},
};

/// A set of fingerprints that forgets its oldest entry once it holds `limit` of them.
#[derive(Debug)]
pub struct BoundedPool {
    limit: usize,
    seen: HashSet<Vec<u8>>,
    order: VecDeque<Vec<u8>>,
}

impl BoundedPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            seen: HashSet::with_capacity(limit),
            order: VecDeque::with_capacity(limit),
        }
    }

    /// Returns false when the fingerprint was already present.
    pub fn insert(&mut self, fingerprint: Vec<u8>) -> bool {
        if self.seen.contains(&fingerprint) {
            return false;
        }
        while self.order.len() >= self.limit {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }
        self.seen.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        true
    }

    pub fn contains(&self, fingerprint: &[u8]) -> bool {
        self.seen.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Anti-replay pools, one per inbound message kind.
pub struct ReceiverPool {
    propagate: Mutex<BoundedPool>,
    propose: Mutex<BoundedPool>,
    vote: Mutex<BoundedPool>,
    precommit: Mutex<BoundedPool>,
}

/// Current sizes of the four pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub propagate: usize,
    pub propose: usize,
    pub vote: usize,
    pub precommit: usize,
}

impl ReceiverPool {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            propagate: Mutex::new(BoundedPool::new(config.propagate_pool_limit)),
            propose: Mutex::new(BoundedPool::new(config.propose_pool_limit)),
            vote: Mutex::new(BoundedPool::new(config.vote_pool_limit)),
            precommit: Mutex::new(BoundedPool::new(config.precommit_pool_limit)),
        }
    }

    pub fn set_propagate(&self, tx: &Transaction) {
        self.propagate.lock().insert(transaction_hash(tx));
    }

    pub fn is_exist_propagate(&self, tx: &Transaction) -> bool {
        self.propagate.lock().contains(&transaction_hash(tx))
    }

    pub fn set_propose(&self, proposal: &Proposal) {
        self.propose
            .lock()
            .insert(proposal_fingerprint(proposal.height(), proposal.round));
    }

    pub fn is_exist_propose(&self, proposal: &Proposal) -> bool {
        self.propose
            .lock()
            .contains(&proposal_fingerprint(proposal.height(), proposal.round))
    }

    pub fn set_vote(&self, vote: &VoteMessage) {
        self.vote.lock().insert(vote_fingerprint(vote));
    }

    pub fn is_exist_vote(&self, vote: &VoteMessage) -> bool {
        self.vote.lock().contains(&vote_fingerprint(vote))
    }

    pub fn set_precommit(&self, precommit: &VoteMessage) {
        self.precommit.lock().insert(vote_fingerprint(precommit));
    }

    pub fn is_exist_precommit(&self, precommit: &VoteMessage) -> bool {
        self.precommit.lock().contains(&vote_fingerprint(precommit))
    }

    pub fn sizes(&self) -> PoolSizes {
        PoolSizes {
            propagate: self.propagate.lock().len(),
            propose: self.propose.lock().len(),
            vote: self.vote.lock().len(),
            precommit: self.precommit.lock().len(),
        }
    }
}
