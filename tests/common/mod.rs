#![allow(dead_code)]

use alloy::signers::local::PrivateKeySigner;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::{sync::Arc, time::Duration};

use bbft::{
    api::{ConsensusReceiver, ConsensusSender},
    config::ConsensusConfig,
    engine::ConsensusStep,
    error::{ConsensusError, collect_errors},
    events::BroadcastEventBus,
    membership::Membership,
    receiver::ConsensusReceiverService,
    service::DefaultConsensusService,
    types::{ConsensusMessage, Peer, Proposal, Transaction, TransactionPayload, VoteMessage},
    utils::{build_transaction, genesis_block},
};

pub const BASE_PORT: u16 = 50053;

pub fn owner_bytes(signer: &PrivateKeySigner) -> Vec<u8> {
    signer.address().as_slice().to_vec()
}

pub fn signers(n: usize) -> Vec<PrivateKeySigner> {
    (0..n).map(|_| PrivateKeySigner::random()).collect()
}

pub fn peers_for(signers: &[PrivateKeySigner]) -> Vec<Peer> {
    signers
        .iter()
        .enumerate()
        .map(|(i, signer)| Peer::new(format!("127.0.0.1:{}", BASE_PORT + i as u16), owner_bytes(signer)))
        .collect()
}

pub fn membership_for(signers: &[PrivateKeySigner]) -> Membership {
    Membership::with_peers(peers_for(signers)).expect("unique peers")
}

pub fn fast_config() -> ConsensusConfig {
    ConsensusConfig::builder()
        .fast_preset()
        .build()
        .expect("fast preset is valid")
}

/// Budgets short enough for timeout tests.
pub fn instant_timeout_config() -> ConsensusConfig {
    ConsensusConfig::builder()
        .with_allowed_connect_delay(Duration::from_millis(5))
        .with_phase_budgets(
            Duration::from_millis(20),
            Duration::from_millis(20),
            Duration::from_millis(20),
            Duration::from_millis(10),
        )
        .build()
        .expect("valid config")
}

pub async fn signed_tx(signer: &PrivateKeySigner, message: &str, nonce: u64) -> Transaction {
    build_transaction(
        TransactionPayload {
            message: message.to_string(),
            nonce,
        },
        signer,
    )
    .await
    .expect("sign transaction")
}

pub fn signer_for<'a>(signers: &'a [PrivateKeySigner], pubkey: &[u8]) -> &'a PrivateKeySigner {
    signers
        .iter()
        .find(|s| owner_bytes(s) == pubkey)
        .expect("signer for pubkey")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// In-process broadcast: every message goes to every registered receiver, the sender's
/// own node included. Replays rejected as duplicates are not reported as failures.
#[derive(Clone, Default)]
pub struct LocalSender {
    receivers: Arc<RwLock<Vec<ConsensusReceiverService<LocalSender>>>>,
}

impl LocalSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, receiver: ConsensusReceiverService<LocalSender>) {
        self.receivers.write().push(receiver);
    }

    async fn deliver(&self, message: ConsensusMessage) -> Result<(), ConsensusError> {
        let receivers = self.receivers.read().clone();
        let results = join_all(
            receivers
                .iter()
                .map(|receiver| receiver.receive(message.clone())),
        )
        .await;
        collect_errors(results.into_iter().map(|result| match result {
            Err(err) if err.is_duplicate() => Ok(()),
            other => other,
        }))
    }
}

#[async_trait::async_trait]
impl ConsensusSender for LocalSender {
    async fn propagate(&self, tx: Transaction) -> Result<(), ConsensusError> {
        self.deliver(ConsensusMessage::Propagate(tx)).await
    }

    async fn propose(&self, proposal: Proposal) -> Result<(), ConsensusError> {
        self.deliver(ConsensusMessage::Propose(proposal)).await
    }

    async fn vote(&self, vote: VoteMessage) -> Result<(), ConsensusError> {
        self.deliver(ConsensusMessage::Vote(vote)).await
    }

    async fn pre_commit(&self, precommit: VoteMessage) -> Result<(), ConsensusError> {
        self.deliver(ConsensusMessage::PreCommit(precommit)).await
    }
}

/// Records outbound messages and fails every broadcast when `failing` is set.
#[derive(Clone, Default)]
pub struct RecordingSender {
    pub sent: Arc<Mutex<Vec<ConsensusMessage>>>,
    pub failing: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<ConsensusMessage> {
        self.sent.lock().clone()
    }

    fn record(&self, message: ConsensusMessage) -> Result<(), ConsensusError> {
        self.sent.lock().push(message);
        if self.failing {
            return Err(ConsensusError::ChannelClosed("network"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConsensusSender for RecordingSender {
    async fn propagate(&self, tx: Transaction) -> Result<(), ConsensusError> {
        self.record(ConsensusMessage::Propagate(tx))
    }

    async fn propose(&self, proposal: Proposal) -> Result<(), ConsensusError> {
        self.record(ConsensusMessage::Propose(proposal))
    }

    async fn vote(&self, vote: VoteMessage) -> Result<(), ConsensusError> {
        self.record(ConsensusMessage::Vote(vote))
    }

    async fn pre_commit(&self, precommit: VoteMessage) -> Result<(), ConsensusError> {
        self.record(ConsensusMessage::PreCommit(precommit))
    }
}

pub struct TestNode<S: ConsensusSender> {
    pub signer: PrivateKeySigner,
    pub service: DefaultConsensusService<S>,
    pub receiver: ConsensusReceiverService<S>,
    pub engine: Option<ConsensusStep<S, BroadcastEventBus>>,
}

/// One node over `sender`, knowing every signer in `all` as a peer.
pub fn build_node<S: ConsensusSender>(
    signer: &PrivateKeySigner,
    all: &[PrivateKeySigner],
    config: ConsensusConfig,
    sender: S,
) -> TestNode<S> {
    let service = DefaultConsensusService::new(config, membership_for(all), genesis_block(), sender)
        .expect("service");
    let (receiver, engine) = service.start(signer.clone()).expect("start node");
    TestNode {
        signer: signer.clone(),
        service,
        receiver,
        engine: Some(engine),
    }
}

/// Every signer becomes a node on one shared [`LocalSender`].
pub fn build_cluster(all: &[PrivateKeySigner], config: ConsensusConfig) -> (LocalSender, Vec<TestNode<LocalSender>>) {
    let network = LocalSender::new();
    let nodes: Vec<_> = all
        .iter()
        .map(|signer| {
            let node = build_node(signer, all, config.clone(), network.clone());
            network.register(node.receiver.clone());
            node
        })
        .collect();
    (network, nodes)
}
