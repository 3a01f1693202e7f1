mod common;

use bbft::{error::ConsensusError, membership::Membership, types::Peer};
use common::{membership_for, owner_bytes, peers_for, signers};

#[test]
fn test_quorum_follows_peer_count() {
    for (n, expected) in [(4, 3), (7, 5), (10, 7), (11, 7)] {
        let membership = membership_for(&signers(n));
        assert_eq!(membership.size(), n);
        assert_eq!(membership.required_accept(), expected, "n={n}");
        assert_eq!(membership.allowed_failures(), (n - 1) / 3, "n={n}");
    }
}

#[test]
fn test_rejects_duplicate_pubkey_and_address() {
    let keys = signers(2);
    let membership = membership_for(&keys);

    let same_key = Peer::new("10.0.0.9:1", owner_bytes(&keys[0]));
    assert!(matches!(
        membership.add_peer(same_key),
        Err(ConsensusError::DuplicatePeer(_))
    ));

    let same_address = Peer::new(peers_for(&keys)[1].address.clone(), vec![9; 20]);
    assert!(matches!(
        membership.add_peer(same_address),
        Err(ConsensusError::DuplicatePeer(_))
    ));
    assert_eq!(membership.size(), 2);
}

#[test]
fn test_lookup_by_pubkey_and_address() {
    let keys = signers(3);
    let peers = peers_for(&keys);
    let membership = membership_for(&keys);

    assert_eq!(membership.get_peer(&peers[1].pubkey), Some(peers[1].clone()));
    assert_eq!(
        membership.get_peer_by_address(&peers[2].address),
        Some(peers[2].clone())
    );
    assert!(membership.get_peer(&[0; 20]).is_none());
    assert!(!membership.contains(&[0; 20]));
}

#[test]
fn test_leader_order_is_stable_for_a_height() {
    let membership = membership_for(&signers(7));
    for height in 0..20 {
        let first = membership.leader_order(height);
        assert_eq!(first.len(), 7);
        assert_eq!(first, membership.leader_order(height), "height {height}");
    }
}

#[test]
fn test_leader_order_varies_across_heights() {
    let membership = membership_for(&signers(7));
    let orders: Vec<_> = (0..10).map(|h| membership.leader_order(h)).collect();
    let distinct = orders
        .iter()
        .enumerate()
        .filter(|(i, order)| orders[..*i].iter().all(|other| other != *order))
        .count();
    assert!(distinct > 5, "only {distinct} distinct orders over 10 heights");
}

#[test]
fn test_leader_order_ignores_insertion_order() {
    let keys = signers(5);
    let peers = peers_for(&keys);

    let forward = Membership::with_peers(peers.clone()).expect("peers");
    let backward = Membership::with_peers(peers.into_iter().rev()).expect("peers");
    for height in 0..10 {
        assert_eq!(forward.leader_order(height), backward.leader_order(height));
    }
}

#[test]
fn test_leader_wraps_round_around_peer_count() {
    let membership = membership_for(&signers(4));
    let order = membership.leader_order(3);
    for round in 0..8u32 {
        let leader = membership.leader(3, round).expect("leader");
        assert_eq!(leader, order[round as usize % 4]);
    }
}

#[test]
fn test_empty_membership_has_no_leader() {
    let membership = Membership::new();
    assert!(matches!(
        membership.leader(1, 0),
        Err(ConsensusError::EmptyPeerSet)
    ));
}
