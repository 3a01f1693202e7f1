//! A Byzantine-fault-tolerant block consensus engine.
//!
//! A fixed set of peers agree height by height on a single chain of blocks while up to
//! f = ⌊(n-1)/3⌋ of them are slow, faulty or malicious. Each height runs rounds of
//! propose, vote and precommit; a round that fails to gather 2f+1 precommits before its
//! deadline is retried with the next leader.
//!
//! ## How it works
//!
//! Network messages enter through [`receiver::ConsensusReceiverService`], which validates
//! and deduplicates them, records votes in the [`lock`], rebroadcasts them, and hands a
//! copy to the single [`engine::ConsensusStep`] over bounded channels. The engine proposes
//! when it is the leader, votes for valid proposals, precommits once a proposal is locked,
//! and commits to the [`chain`] on a precommit quorum.
//!
//! Networking is left to the caller: implement [`api::ConsensusSender`] for your transport
//! and feed inbound messages into [`api::ConsensusReceiver`]. [`service::ConsensusService`]
//! wires a node together from in-memory components.

pub mod api;
pub mod chain;
pub mod channel;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod finder;
pub mod lock;
pub mod membership;
pub mod pool;
pub mod queue;
pub mod receiver;
pub mod service;
pub mod types;
pub mod utils;
pub mod validation;
