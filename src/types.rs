//! Wire model shared by the receiver, the engine and transports.
//!
//! The structs derive [`prost::Message`] so transports can frame them directly and so
//! header and payload hashes are taken over a stable encoding.

/// A signer's address paired with its recoverable signature.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Signature {
    /// 20-byte address of the signer.
    #[prost(bytes = "vec", tag = "1")]
    pub pubkey: Vec<u8>,
    /// 65-byte recoverable secp256k1 signature.
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct TransactionPayload {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Transaction {
    #[prost(message, optional, tag = "1")]
    pub payload: Option<TransactionPayload>,
    #[prost(message, repeated, tag = "2")]
    pub signatures: Vec<Signature>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct BlockHeader {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub pre_block_hash: Vec<u8>,
    /// Planned commit time, unix nanoseconds.
    #[prost(uint64, tag = "3")]
    pub created_time: u64,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Block {
    #[prost(message, optional, tag = "1")]
    pub header: Option<BlockHeader>,
    #[prost(message, repeated, tag = "2")]
    pub transactions: Vec<Transaction>,
    #[prost(message, optional, tag = "3")]
    pub signature: Option<Signature>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.as_ref().map(|h| h.height).unwrap_or_default()
    }

    pub fn created_time(&self) -> u64 {
        self.header.as_ref().map(|h| h.created_time).unwrap_or_default()
    }

    pub fn pre_block_hash(&self) -> &[u8] {
        self.header
            .as_ref()
            .map(|h| h.pre_block_hash.as_slice())
            .unwrap_or_default()
    }

    pub fn signer(&self) -> Option<&[u8]> {
        self.signature.as_ref().map(|s| s.pubkey.as_slice())
    }
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Proposal {
    #[prost(message, optional, tag = "1")]
    pub block: Option<Block>,
    #[prost(uint32, tag = "2")]
    pub round: u32,
}

impl Proposal {
    pub fn height(&self) -> u64 {
        self.block.as_ref().map(Block::height).unwrap_or_default()
    }
}

/// Used for both the vote and the precommit phase.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct VoteMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub block_hash: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub signature: Option<Signature>,
}

impl VoteMessage {
    pub fn voter(&self) -> Option<&[u8]> {
        self.signature.as_ref().map(|s| s.pubkey.as_slice())
    }
}

#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Peer {
    #[prost(string, tag = "1")]
    pub address: String,
    #[prost(bytes = "vec", tag = "2")]
    pub pubkey: Vec<u8>,
}

impl Peer {
    pub fn new(address: impl Into<String>, pubkey: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            pubkey,
        }
    }
}

/// Every message a peer can receive from the network.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusMessage {
    Propagate(Transaction),
    Propose(Proposal),
    Vote(VoteMessage),
    PreCommit(VoteMessage),
}

impl ConsensusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Propagate(_) => "propagate",
            ConsensusMessage::Propose(_) => "propose",
            ConsensusMessage::Vote(_) => "vote",
            ConsensusMessage::PreCommit(_) => "precommit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// A block was appended to the local chain.
    BlockCommitted {
        height: u64,
        round: u32,
        block_hash: Vec<u8>,
    },
    /// A round ended without precommit quorum; the engine moves to `round + 1`.
    RoundFailed { height: u64, round: u32 },
}
