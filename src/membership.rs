use parking_lot::RwLock;
use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use crate::{
    error::ConsensusError,
    types::Peer,
    utils::{allowed_failures, required_accept, short_hex},
};

/// The validator set, kept in canonical order (sorted by pubkey).
///
/// Leader selection only depends on the height and on this canonical order, so every
/// replica that knows the same peers picks the same leader regardless of the order in
/// which peers were added.
#[derive(Default)]
pub struct Membership {
    peers: RwLock<Vec<Peer>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers<I>(peers: I) -> Result<Self, ConsensusError>
    where
        I: IntoIterator<Item = Peer>,
    {
        let membership = Self::new();
        for peer in peers {
            membership.add_peer(peer)?;
        }
        Ok(membership)
    }

    /// Peers are unique by pubkey and by address.
    pub fn add_peer(&self, peer: Peer) -> Result<(), ConsensusError> {
        let mut peers = self.peers.write();
        if peers.iter().any(|p| p.address == peer.address) {
            return Err(ConsensusError::DuplicatePeer(peer.address));
        }
        match peers.binary_search_by(|p| p.pubkey.cmp(&peer.pubkey)) {
            Ok(_) => Err(ConsensusError::DuplicatePeer(short_hex(&peer.pubkey))),
            Err(pos) => {
                peers.insert(pos, peer);
                Ok(())
            }
        }
    }

    pub fn size(&self) -> usize {
        self.peers.read().len()
    }

    pub fn allowed_failures(&self) -> usize {
        allowed_failures(self.size())
    }

    pub fn required_accept(&self) -> usize {
        required_accept(self.size())
    }

    pub fn get_peer(&self, pubkey: &[u8]) -> Option<Peer> {
        let peers = self.peers.read();
        peers
            .binary_search_by(|p| p.pubkey.as_slice().cmp(pubkey))
            .ok()
            .map(|idx| peers[idx].clone())
    }

    pub fn get_peer_by_address(&self, address: &str) -> Option<Peer> {
        self.peers
            .read()
            .iter()
            .find(|p| p.address == address)
            .cloned()
    }

    pub fn contains(&self, pubkey: &[u8]) -> bool {
        self.get_peer(pubkey).is_some()
    }

    /// All peers in canonical order.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().clone()
    }

    /// Height-seeded permutation of the canonical peer list.
    pub fn leader_order(&self, height: u64) -> Vec<Peer> {
        let mut order = self.peers();
        let mut rng = ChaCha8Rng::from_seed(leader_seed(height, &order));
        order.shuffle(&mut rng);
        order
    }

    pub fn leader(&self, height: u64, round: u32) -> Result<Peer, ConsensusError> {
        let order = self.leader_order(height);
        if order.is_empty() {
            return Err(ConsensusError::EmptyPeerSet);
        }
        let idx = round as usize % order.len();
        Ok(order[idx].clone())
    }
}

fn leader_seed(height: u64, peers: &[Peer]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(height.to_be_bytes());
    for peer in peers {
        hasher.update(&peer.pubkey);
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&hasher.finalize());
    seed
}
