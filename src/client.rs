use tracing::{debug, warn};

use crate::{
    api::{ClientGate, ConsensusSender},
    error::ConsensusError,
    types::Transaction,
    utils::{short_hex, transaction_hash},
    validation::validate_transaction,
};

/// Entry point for client-submitted transactions.
///
/// The transaction is only validated and broadcast here; it reaches the local queue the
/// same way it reaches every other peer, through the receiver.
#[derive(Clone)]
pub struct ClientGateService<S>
where
    S: ConsensusSender,
{
    sender: S,
}

impl<S> ClientGateService<S>
where
    S: ConsensusSender,
{
    pub fn new(sender: S) -> Self {
        Self { sender }
    }
}

impl<S> ClientGate for ClientGateService<S>
where
    S: ConsensusSender,
{
    async fn gate(&self, tx: Transaction) -> Result<(), ConsensusError> {
        validate_transaction(&tx)?;
        let hash = short_hex(&transaction_hash(&tx));
        if let Err(err) = self.sender.propagate(tx).await {
            warn!("Broadcast of client transaction {hash} failed: {err}");
        } else {
            debug!("Gated client transaction {hash}");
        }
        Ok(())
    }
}
