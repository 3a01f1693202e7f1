use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::{
    error::ConsensusError,
    types::{Proposal, VoteMessage},
    utils::short_hex,
};

/// Proposals seen by the engine, indexed by (height, round).
///
/// Holds at most `limit` proposals. When full, the entry furthest in the future gives way
/// to a nearer one, so a flood of far-ahead proposals cannot push out the current round.
#[derive(Debug)]
pub struct ProposalFinder {
    limit: usize,
    proposals: BTreeMap<(u64, u32), Proposal>,
}

impl ProposalFinder {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            proposals: BTreeMap::new(),
        }
    }

    /// Keeps the first proposal seen for a (height, round).
    pub fn set(&mut self, proposal: Proposal) -> Result<(), ConsensusError> {
        if proposal.block.is_none() {
            return Err(ConsensusError::EmptyProposal);
        }
        let key = (proposal.height(), proposal.round);
        if self.proposals.contains_key(&key) {
            return Ok(());
        }
        if self.proposals.len() >= self.limit {
            match self.proposals.last_key_value() {
                Some((furthest, _)) if *furthest > key => {
                    let furthest = *furthest;
                    self.proposals.remove(&furthest);
                }
                _ => {
                    return Err(ConsensusError::ProposalBufferFull { limit: self.limit });
                }
            }
        }
        self.proposals.insert(key, proposal);
        Ok(())
    }

    pub fn find(&self, height: u64, round: u32) -> Option<&Proposal> {
        self.proposals.get(&(height, round))
    }

    /// Forget every height below `height`.
    pub fn clear(&mut self, height: u64) {
        self.proposals = self.proposals.split_off(&(height, 0));
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

/// Counts precommits per block hash and reports each quorum once.
#[derive(Debug)]
pub struct PreCommitFinder {
    limit: usize,
    tallies: HashMap<Vec<u8>, Tally>,
    order: VecDeque<Vec<u8>>,
    collected: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Tally {
    voters: HashSet<Vec<u8>>,
    fired: bool,
}

impl PreCommitFinder {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            tallies: HashMap::new(),
            order: VecDeque::new(),
            collected: None,
        }
    }

    pub fn set(&mut self, precommit: &VoteMessage, required_accept: usize) -> Result<(), ConsensusError> {
        let voter = precommit.voter().ok_or(ConsensusError::EmptyVote)?.to_vec();
        let hash = precommit.block_hash.clone();

        if !self.tallies.contains_key(&hash) {
            while self.order.len() >= self.limit {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.tallies.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(hash.clone());
        }

        let tally = self.tallies.entry(hash.clone()).or_default();
        if !tally.voters.insert(voter) {
            return Err(ConsensusError::DuplicatePreCommit);
        }
        if !tally.fired && tally.voters.len() >= required_accept {
            tally.fired = true;
            debug!(
                "PreCommit quorum for {} with {} precommits",
                short_hex(&hash),
                tally.voters.len()
            );
            self.collected = Some(hash);
        }
        Ok(())
    }

    /// The hash that last reached quorum. Returns it once, then resets.
    pub fn get(&mut self) -> Option<Vec<u8>> {
        self.collected.take()
    }

    /// Drop the tally for a committed block.
    pub fn remove(&mut self, hash: &[u8]) {
        if self.tallies.remove(hash).is_some() {
            self.order.retain(|h| h.as_slice() != hash);
        }
        if self.collected.as_deref() == Some(hash) {
            self.collected = None;
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
