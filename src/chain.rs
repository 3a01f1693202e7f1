use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::{
    error::{ChainError, ConsensusError},
    types::{Block, Transaction},
    utils::{block_hash, short_hex, transaction_hash},
    validation::validate_block,
};

/// Append-only log of committed blocks.
///
/// Implementations must run [`BlockChain::verify_commit`] and the append under the same
/// writer lock so two racing commits cannot both pass verification.
pub trait BlockChain: Send + Sync + 'static {
    /// Latest committed block, if any.
    fn top(&self) -> Option<Block>;

    /// Number of committed blocks, which is also the next height to commit.
    fn next_height(&self) -> u64;

    fn verify_commit(&self, block: &Block) -> Result<(), ConsensusError>;

    fn commit(&self, block: Block) -> Result<(), ConsensusError>;

    fn find_tx(&self, hash: &[u8]) -> Option<Transaction>;

    fn find_block(&self, height: u64) -> Option<Block>;
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<Block>,
    block_index: HashMap<Vec<u8>, u64>,
    tx_index: HashMap<Vec<u8>, Transaction>,
}

impl ChainState {
    fn check_commit(&self, block: &Block) -> Result<Vec<u8>, ChainError> {
        validate_block(block).map_err(|e| ChainError::BlockVerification(e.to_string()))?;

        let expected = self.blocks.len() as u64;
        if block.height() != expected {
            return Err(ChainError::HeightMismatch {
                expected,
                actual: block.height(),
            });
        }

        if let Some(top) = self.blocks.last() {
            if block.pre_block_hash() != block_hash(top).as_slice() {
                return Err(ChainError::PreBlockHashMismatch);
            }
            if block.created_time() <= top.created_time() {
                return Err(ChainError::CreatedTimeNotIncreasing {
                    top: top.created_time(),
                    actual: block.created_time(),
                });
            }
        }
        // No later block could follow it.
        if block.created_time() == u64::MAX {
            return Err(ChainError::CreatedTimeNotIncreasing {
                top: self.blocks.last().map(Block::created_time).unwrap_or_default(),
                actual: block.created_time(),
            });
        }

        let hash = block_hash(block);
        if self.block_index.contains_key(&hash) {
            return Err(ChainError::BlockAlreadyCommitted);
        }
        Ok(hash)
    }

    fn append(&mut self, hash: Vec<u8>, block: Block) {
        let height = block.height();
        for tx in &block.transactions {
            self.tx_index.insert(transaction_hash(tx), tx.clone());
        }
        self.block_index.insert(hash, height);
        self.blocks.push(block);
    }
}

/// In-memory implementation of [`BlockChain`].
#[derive(Default)]
pub struct InMemoryBlockChain {
    state: RwLock<ChainState>,
}

impl InMemoryBlockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a chain from an agreed, unsigned genesis block.
    pub fn with_genesis(genesis: Block) -> Result<Self, ConsensusError> {
        if genesis.height() != 0 {
            return Err(ChainError::InvalidGenesis.into());
        }
        let chain = Self::new();
        let hash = block_hash(&genesis);
        debug!("Bootstrapping chain from genesis {}", short_hex(&hash));
        chain.state.write().append(hash, genesis);
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.state.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockChain for InMemoryBlockChain {
    fn top(&self) -> Option<Block> {
        self.state.read().blocks.last().cloned()
    }

    fn next_height(&self) -> u64 {
        self.state.read().blocks.len() as u64
    }

    fn verify_commit(&self, block: &Block) -> Result<(), ConsensusError> {
        self.state.read().check_commit(block)?;
        Ok(())
    }

    fn commit(&self, block: Block) -> Result<(), ConsensusError> {
        let mut state = self.state.write();
        let hash = state.check_commit(&block)?;
        let height = block.height();
        let tx_count = block.transactions.len();
        state.append(hash.clone(), block);
        info!(
            "Committed block {} at height {height} with {tx_count} transactions",
            short_hex(&hash)
        );
        Ok(())
    }

    fn find_tx(&self, hash: &[u8]) -> Option<Transaction> {
        self.state.read().tx_index.get(hash).cloned()
    }

    fn find_block(&self, height: u64) -> Option<Block> {
        self.state.read().blocks.get(height as usize).cloned()
    }
}
