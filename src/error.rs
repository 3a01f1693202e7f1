use std::fmt;

use alloy::primitives::SignatureError;

/// Coarse classification of a [`ConsensusError`].
///
/// Transports map these onto their own status codes; the engine uses them to
/// tell idempotent replays apart from real failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad shape or signature; the caller sent something invalid.
    Validation,
    /// Wrong leader or unknown signer.
    Authorization,
    /// Already seen; safe to ignore.
    Duplicate,
    /// A bounded structure is full; retry later.
    Capacity,
    /// No quorum before a phase deadline.
    RoundFailure,
    /// A commit would break the chain's invariants.
    ChainIntegrity,
    /// Local faults: closed channels, signing backends, configuration.
    Internal,
}

/// Reasons a block is refused by the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Height mismatch: expected {expected}, actual {actual}")]
    HeightMismatch { expected: u64, actual: u64 },
    #[error("Previous block hash does not match the chain top")]
    PreBlockHashMismatch,
    #[error("Created time {actual} is not after the chain top ({top})")]
    CreatedTimeNotIncreasing { top: u64, actual: u64 },
    #[error("Block already committed")]
    BlockAlreadyCommitted,
    #[error("Block failed verification: {0}")]
    BlockVerification(String),
    #[error("Genesis block must have height 0 and an empty chain")]
    InvalidGenesis,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Mismatched length: expected {expect}, actual {actual}")]
    MismatchedLength { expect: usize, actual: usize },
    #[error("Empty signature")]
    EmptySignature,
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("Signature does not match signer {0}")]
    SignatureMismatch(String),
    #[error("Failed to sign message: {0}")]
    FailedToSignMessage(#[from] alloy_signer::Error),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Proposal carries no block")]
    EmptyProposal,
    #[error("Vote carries no signature")]
    EmptyVote,

    #[error("Proposal for height {height} round {round} is not signed by the leader")]
    NotLeader { height: u64, round: u32 },
    #[error("Unknown peer {0}")]
    UnknownPeer(String),
    #[error("Peer set is empty")]
    EmptyPeerSet,

    #[error("Duplicate peer {0}")]
    DuplicatePeer(String),
    #[error("Transaction {0} already seen")]
    DuplicateTransaction(String),
    #[error("Transaction {0} already committed")]
    TransactionAlreadyCommitted(String),
    #[error("Proposal for height {height} round {round} already seen")]
    DuplicateProposal { height: u64, round: u32 },
    #[error("Proposal {0} already registered")]
    ProposalAlreadyRegistered(String),
    #[error("Vote already seen")]
    DuplicateVote,
    #[error("PreCommit already seen")]
    DuplicatePreCommit,

    #[error("Transaction queue is full (limit {limit})")]
    QueueFull { limit: usize },

    #[error("Proposal buffer is full (limit {limit})")]
    ProposalBufferFull { limit: usize },

    #[error("Round {round} at height {height} failed to reach quorum")]
    RoundFailed { height: u64, round: u32 },
    #[error("No proposal to commit at height {height}")]
    NothingToCommit { height: u64 },

    #[error("Chain integrity violated: {0}")]
    ChainIntegrity(#[from] ChainError),

    #[error("Channel {0} closed")]
    ChannelClosed(&'static str),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{0}")]
    Multiple(ErrorList),
}

impl ConsensusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::MismatchedLength { .. }
            | ConsensusError::EmptySignature
            | ConsensusError::InvalidSignature(_)
            | ConsensusError::SignatureMismatch(_)
            | ConsensusError::InvalidTransaction(_)
            | ConsensusError::InvalidBlock(_)
            | ConsensusError::EmptyProposal
            | ConsensusError::EmptyVote => ErrorKind::Validation,

            ConsensusError::NotLeader { .. }
            | ConsensusError::UnknownPeer(_)
            | ConsensusError::EmptyPeerSet => ErrorKind::Authorization,

            ConsensusError::DuplicatePeer(_)
            | ConsensusError::DuplicateTransaction(_)
            | ConsensusError::TransactionAlreadyCommitted(_)
            | ConsensusError::DuplicateProposal { .. }
            | ConsensusError::ProposalAlreadyRegistered(_)
            | ConsensusError::DuplicateVote
            | ConsensusError::DuplicatePreCommit => ErrorKind::Duplicate,

            ConsensusError::QueueFull { .. } | ConsensusError::ProposalBufferFull { .. } => {
                ErrorKind::Capacity
            }

            ConsensusError::RoundFailed { .. } | ConsensusError::NothingToCommit { .. } => {
                ErrorKind::RoundFailure
            }

            ConsensusError::ChainIntegrity(_) => ErrorKind::ChainIntegrity,

            ConsensusError::FailedToSignMessage(_)
            | ConsensusError::ChannelClosed(_)
            | ConsensusError::InvalidConfiguration(_) => ErrorKind::Internal,

            // An aggregate is as severe as its first member.
            ConsensusError::Multiple(list) => list
                .errors()
                .first()
                .map(ConsensusError::kind)
                .unwrap_or(ErrorKind::Internal),
        }
    }

    /// True when the error only reports an already-processed message.
    pub fn is_duplicate(&self) -> bool {
        match self {
            ConsensusError::Multiple(list) => list.errors().iter().all(ConsensusError::is_duplicate),
            other => other.kind() == ErrorKind::Duplicate,
        }
    }
}

/// Several errors raised by side effects that ran concurrently.
#[derive(Debug)]
pub struct ErrorList(Vec<ConsensusError>);

impl ErrorList {
    pub fn errors(&self) -> &[ConsensusError] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<ConsensusError> {
        self.0
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, err) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Fold the outcome of joined side effects into a single result.
///
/// Every failure is kept: one error is returned as is, several become
/// [`ConsensusError::Multiple`].
pub fn collect_errors<I>(results: I) -> Result<(), ConsensusError>
where
    I: IntoIterator<Item = Result<(), ConsensusError>>,
{
    let mut errors: Vec<ConsensusError> = results.into_iter().filter_map(Result::err).collect();
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ConsensusError::Multiple(ErrorList(errors))),
    }
}
