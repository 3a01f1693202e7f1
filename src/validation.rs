//! Stateless checks look only at the message itself. Stateful checks also consult the chain.

use std::collections::HashSet;

use crate::{
    chain::BlockChain,
    error::ConsensusError,
    types::{Block, Transaction},
    utils::{block_hash, short_hex, transaction_hash, verify_signature},
};

/// A transaction needs a payload and at least one signature, all over the payload hash.
pub fn validate_transaction(tx: &Transaction) -> Result<(), ConsensusError> {
    if tx.payload.is_none() {
        return Err(ConsensusError::InvalidTransaction("missing payload".into()));
    }
    if tx.signatures.is_empty() {
        return Err(ConsensusError::InvalidTransaction("no signatures".into()));
    }
    let hash = transaction_hash(tx);
    for signature in &tx.signatures {
        verify_signature(signature, &hash)?;
    }
    Ok(())
}

/// Header present, signature over the block hash valid, every transaction valid and unique.
pub fn validate_block(block: &Block) -> Result<(), ConsensusError> {
    if block.header.is_none() {
        return Err(ConsensusError::InvalidBlock("missing header".into()));
    }
    let signature = block
        .signature
        .as_ref()
        .ok_or(ConsensusError::EmptySignature)?;
    verify_signature(signature, &block_hash(block))?;

    let mut seen = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        validate_transaction(tx)?;
        let hash = transaction_hash(tx);
        if !seen.insert(hash.clone()) {
            return Err(ConsensusError::InvalidBlock(format!(
                "transaction {} included twice",
                short_hex(&hash)
            )));
        }
    }
    Ok(())
}

/// The block must be the chain's next commit and must not re-include committed transactions.
pub fn validate_block_stateful(chain: &dyn BlockChain, block: &Block) -> Result<(), ConsensusError> {
    chain.verify_commit(block)?;
    for tx in &block.transactions {
        let hash = transaction_hash(tx);
        if chain.find_tx(&hash).is_some() {
            return Err(ConsensusError::TransactionAlreadyCommitted(short_hex(&hash)));
        }
    }
    Ok(())
}
