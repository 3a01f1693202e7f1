use alloy::primitives::{Signature as RecoverableSignature, hex};
use alloy_signer::Signer;
use prost::Message;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    error::ConsensusError,
    types::{Block, BlockHeader, Signature, Transaction, TransactionPayload, VoteMessage},
};

const SIGNATURE_LENGTH: usize = 65;

pub fn hash_bytes(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

/// Short hex form used in logs and error messages.
pub fn short_hex(bytes: &[u8]) -> String {
    let shown = bytes.len().min(8);
    hex::encode(&bytes[..shown])
}

pub fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// f = ⌊(n-1)/3⌋, the number of faulty peers tolerated.
pub fn allowed_failures(peers: usize) -> usize {
    peers.saturating_sub(1) / 3
}

/// 2f+1 matching messages make a quorum.
pub fn required_accept(peers: usize) -> usize {
    2 * allowed_failures(peers) + 1
}

pub async fn sign_message<S: Signer + Sync>(
    signer: &S,
    message: &[u8],
) -> Result<Signature, ConsensusError> {
    let signature = signer.sign_message(message).await?;
    Ok(Signature {
        pubkey: signer.address().as_slice().to_vec(),
        signature: signature.as_bytes().to_vec(),
    })
}

/// Check that `signature` was produced over `message` by the key behind `signature.pubkey`.
pub fn verify_signature(signature: &Signature, message: &[u8]) -> Result<(), ConsensusError> {
    if signature.signature.is_empty() {
        return Err(ConsensusError::EmptySignature);
    }
    let signature_bytes: [u8; SIGNATURE_LENGTH] =
        signature
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| ConsensusError::MismatchedLength {
                expect: SIGNATURE_LENGTH,
                actual: signature.signature.len(),
            })?;
    let recoverable = RecoverableSignature::from_raw_array(&signature_bytes)?;
    let address = recoverable.recover_address_from_msg(message)?;
    if address.as_slice() != signature.pubkey.as_slice() {
        return Err(ConsensusError::SignatureMismatch(short_hex(
            &signature.pubkey,
        )));
    }
    Ok(())
}

pub fn payload_hash(payload: Option<&TransactionPayload>) -> Vec<u8> {
    let bytes = payload.map(|p| p.encode_to_vec()).unwrap_or_default();
    hash_bytes(&bytes)
}

pub fn transaction_hash(tx: &Transaction) -> Vec<u8> {
    payload_hash(tx.payload.as_ref())
}

pub fn header_hash(header: Option<&BlockHeader>) -> Vec<u8> {
    let bytes = header.map(|h| h.encode_to_vec()).unwrap_or_default();
    hash_bytes(&bytes)
}

/// H(H(header) ‖ H(tx₁.payload) ‖ … ‖ H(txₙ.payload)).
pub fn block_hash(block: &Block) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(header_hash(block.header.as_ref()));
    for tx in &block.transactions {
        hasher.update(transaction_hash(tx));
    }
    hasher.finalize().to_vec()
}

pub async fn build_transaction<S: Signer + Sync>(
    payload: TransactionPayload,
    signer: &S,
) -> Result<Transaction, ConsensusError> {
    let signature = sign_message(signer, &payload_hash(Some(&payload))).await?;
    Ok(Transaction {
        payload: Some(payload),
        signatures: vec![signature],
    })
}

pub async fn build_block<S: Signer + Sync>(
    height: u64,
    pre_block_hash: Vec<u8>,
    created_time: u64,
    transactions: Vec<Transaction>,
    signer: &S,
) -> Result<Block, ConsensusError> {
    let mut block = Block {
        header: Some(BlockHeader {
            height,
            pre_block_hash,
            created_time,
        }),
        transactions,
        signature: None,
    };
    block.signature = Some(sign_message(signer, &block_hash(&block)).await?);
    Ok(block)
}

/// The unsigned block every replica starts from.
pub fn genesis_block() -> Block {
    Block {
        header: Some(BlockHeader {
            height: 0,
            pre_block_hash: Vec::new(),
            created_time: 0,
        }),
        transactions: Vec::new(),
        signature: None,
    }
}

pub async fn build_vote<S: Signer + Sync>(
    block_hash: Vec<u8>,
    signer: &S,
) -> Result<VoteMessage, ConsensusError> {
    let signature = sign_message(signer, &block_hash).await?;
    Ok(VoteMessage {
        block_hash,
        signature: Some(signature),
    })
}

pub fn proposal_fingerprint(height: u64, round: u32) -> Vec<u8> {
    format!("{height}::{round}").into_bytes()
}

/// blockHash ‖ voter pubkey.
pub fn vote_fingerprint(vote: &VoteMessage) -> Vec<u8> {
    let mut key = vote.block_hash.clone();
    if let Some(voter) = vote.voter() {
        key.extend_from_slice(voter);
    }
    key
}
