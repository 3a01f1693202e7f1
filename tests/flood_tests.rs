mod common;

use alloy::signers::local::PrivateKeySigner;
use futures::future::join_all;
use tokio::time::Instant;

use bbft::{
    api::ConsensusReceiver,
    config::ConsensusConfig,
    error::{ConsensusError, ErrorKind},
    types::Proposal,
    utils::{block_hash, build_block, build_vote, genesis_block},
};
use common::{RecordingSender, build_node, membership_for, owner_bytes, signed_tx, signer_for, signers};

const PEERS: usize = 4;
const LIMIT: usize = 8;
const FLOOD: usize = 60;

fn tight_config() -> ConsensusConfig {
    ConsensusConfig::builder()
        .fast_preset()
        .with_queue_limit(LIMIT)
        .with_pool_limits(LIMIT, LIMIT, LIMIT, LIMIT)
        .with_lock_limits(LIMIT, LIMIT)
        .with_precommit_finder_limit(LIMIT)
        .build()
        .expect("config")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transaction_flood_stays_within_limits() {
    let keys = signers(PEERS);
    let mut node = build_node(&keys[0], &keys, tight_config(), RecordingSender::default());
    let engine = tokio::spawn(node.engine.take().expect("engine").run());

    let client = PrivateKeySigner::random();
    let mut txs = Vec::new();
    for nonce in 0..FLOOD as u64 {
        txs.push(signed_tx(&client, "flood", nonce).await);
    }
    let results = join_all(txs.into_iter().map(|tx| node.receiver.propagate(tx))).await;

    let rejected: Vec<ConsensusError> = results.into_iter().filter_map(Result::err).collect();
    assert!(!rejected.is_empty(), "queue must push back");
    assert!(rejected.iter().all(|err| err.kind() == ErrorKind::Capacity));
    assert!(node.service.queue().len() <= LIMIT);
    assert!(node.receiver.pool().sizes().propagate <= LIMIT);

    engine.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_vote_and_precommit_flood_stays_within_limits() {
    let keys = signers(PEERS);
    let mut node = build_node(&keys[0], &keys, tight_config(), RecordingSender::default());
    let engine = tokio::spawn(node.engine.take().expect("engine").run());

    let mut votes = Vec::new();
    for i in 0..FLOOD {
        let hash = vec![i as u8; 32];
        for voter in &keys {
            votes.push(build_vote(hash.clone(), voter).await.expect("vote"));
        }
    }

    for vote in &votes {
        node.receiver.vote(vote.clone()).await.expect("fresh vote");
        node.receiver
            .pre_commit(vote.clone())
            .await
            .expect("fresh precommit");
    }

    let sizes = node.receiver.pool().sizes();
    assert_eq!(sizes.vote, LIMIT);
    assert_eq!(sizes.precommit, LIMIT);
    assert!(!node.receiver.pool().is_exist_vote(&votes[0]), "oldest evicted");
    assert!(node.receiver.pool().is_exist_vote(&votes[votes.len() - 1]));
    let oldest_tally = node
        .service
        .lock()
        .vote_count(votes[0].block_hash.clone())
        .await
        .expect("lock task");
    assert_eq!(oldest_tally, 0, "lock tally for the oldest hash was evicted");

    engine.abort();
}

async fn signed_proposal(signer: &PrivateKeySigner, height: u64, round: u32) -> Proposal {
    let block = build_block(height, block_hash(&genesis_block()), 1_000 + height, vec![], signer)
        .await
        .expect("block");
    Proposal {
        block: Some(block),
        round,
    }
}

#[tokio::test]
async fn test_future_proposal_flood_stays_within_limits() {
    let keys = signers(PEERS);
    let membership = membership_for(&keys);
    let leader = membership.leader(1, 0).expect("leader");
    let flooder = signer_for(&keys, &leader.pubkey);
    let target = keys
        .iter()
        .find(|k| owner_bytes(k) != leader.pubkey)
        .expect("follower");
    let config = ConsensusConfig::builder()
        .fast_preset()
        .with_pool_limits(LIMIT, FLOOD * 2, LIMIT, LIMIT)
        .with_proposal_finder_limit(LIMIT)
        .build()
        .expect("config");
    let mut node = build_node(target, &keys, config, RecordingSender::default());

    for height in 2..(FLOOD as u64 + 2) {
        let round = membership
            .leader_order(height)
            .iter()
            .position(|peer| peer.pubkey == leader.pubkey)
            .expect("flooder leads some round") as u32;
        let proposal = signed_proposal(flooder, height, round).await;
        node.receiver.propose(proposal).await.expect("future proposal");
    }
    let current = signed_proposal(flooder, 1, 0).await;
    node.receiver.propose(current.clone()).await.expect("current proposal");

    let mut engine = node.engine.take().expect("engine");
    engine.start_round(Instant::now());
    engine.propose(1, 0).await.expect("propose");

    assert_eq!(engine.current_proposal(), Some(&current));
    assert!(engine.buffered_proposals() <= LIMIT);
}
