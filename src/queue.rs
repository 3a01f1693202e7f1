use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use tracing::warn;

use crate::{
    error::ConsensusError,
    types::Transaction,
    utils::{short_hex, transaction_hash},
};

/// FIFO of gossiped transactions waiting to be proposed.
pub trait ProposalTxQueue: Send + Sync + 'static {
    /// Fails on a hash that is already queued, or when the queue is at its limit.
    fn push(&self, tx: Transaction) -> Result<(), ConsensusError>;

    /// Oldest queued transaction.
    fn pop(&self) -> Option<Transaction>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<(Vec<u8>, Transaction)>,
    hashes: HashSet<Vec<u8>>,
}

/// In-memory implementation of [`ProposalTxQueue`].
pub struct InMemoryProposalTxQueue {
    limit: usize,
    state: Mutex<QueueState>,
}

impl InMemoryProposalTxQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl ProposalTxQueue for InMemoryProposalTxQueue {
    fn push(&self, tx: Transaction) -> Result<(), ConsensusError> {
        let hash = transaction_hash(&tx);
        let mut state = self.state.lock();
        if state.hashes.contains(&hash) {
            return Err(ConsensusError::DuplicateTransaction(short_hex(&hash)));
        }
        if state.entries.len() >= self.limit {
            warn!("Transaction queue full (limit {}), dropping {}", self.limit, short_hex(&hash));
            return Err(ConsensusError::QueueFull { limit: self.limit });
        }
        state.hashes.insert(hash.clone());
        state.entries.push_back((hash, tx));
        Ok(())
    }

    fn pop(&self) -> Option<Transaction> {
        let mut state = self.state.lock();
        let (hash, tx) = state.entries.pop_front()?;
        state.hashes.remove(&hash);
        Some(tx)
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}
