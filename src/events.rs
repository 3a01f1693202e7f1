use tokio::sync::broadcast;

use crate::types::ConsensusEvent;

pub trait ConsensusEventBus: Clone + Send + Sync + 'static {
    /// Type returned to consumers that subscribe to consensus events.
    type Receiver;

    fn subscribe(&self) -> Self::Receiver;
    fn publish(&self, event: ConsensusEvent);
}

#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<ConsensusEvent>,
}

impl BroadcastEventBus {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ConsensusEventBus for BroadcastEventBus {
    type Receiver = broadcast::Receiver<ConsensusEvent>;

    fn subscribe(&self) -> Self::Receiver {
        self.sender.subscribe()
    }

    fn publish(&self, event: ConsensusEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
