use std::time::Duration;

use crate::error::ConsensusError;

/// Capacities and phase budgets for one node.
///
/// Every bounded structure in the engine takes its limit from here; the three engine
/// channels reuse the matching pool limit as their capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusConfig {
    /// Pending transactions waiting for a leader.
    pub queue_limit: usize,
    /// Proposals remembered by the lock.
    pub lock_registered_limit: usize,
    /// Block hashes whose votes the lock keeps counting.
    pub lock_voted_limit: usize,
    pub propagate_pool_limit: usize,
    pub propose_pool_limit: usize,
    pub vote_pool_limit: usize,
    pub precommit_pool_limit: usize,
    /// Block hashes whose precommits the engine keeps counting.
    pub precommit_finder_limit: usize,
    /// Proposals the engine buffers for rounds it has not reached yet.
    pub proposal_finder_limit: usize,
    /// Upper bound on transactions the leader puts in one block.
    pub max_block_transactions: usize,
    /// Network delay allowance added after each phase budget.
    pub allowed_connect_delay: Duration,
    pub propose_max_calc_time: Duration,
    pub vote_max_calc_time: Duration,
    pub precommit_max_calc_time: Duration,
    pub commit_max_calc_time: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            queue_limit: 100,
            lock_registered_limit: 100,
            lock_voted_limit: 500,
            propagate_pool_limit: 1000,
            propose_pool_limit: 100,
            vote_pool_limit: 100,
            precommit_pool_limit: 100,
            precommit_finder_limit: 100,
            proposal_finder_limit: 100,
            max_block_transactions: 100,
            allowed_connect_delay: Duration::from_millis(500),
            propose_max_calc_time: Duration::from_secs(1),
            vote_max_calc_time: Duration::from_secs(2),
            precommit_max_calc_time: Duration::from_millis(500),
            commit_max_calc_time: Duration::from_secs(1),
        }
    }
}

impl ConsensusConfig {
    pub fn builder() -> ConsensusConfigBuilder {
        ConsensusConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConsensusError> {
        let capacities = [
            ("queue_limit", self.queue_limit),
            ("lock_registered_limit", self.lock_registered_limit),
            ("lock_voted_limit", self.lock_voted_limit),
            ("propagate_pool_limit", self.propagate_pool_limit),
            ("propose_pool_limit", self.propose_pool_limit),
            ("vote_pool_limit", self.vote_pool_limit),
            ("precommit_pool_limit", self.precommit_pool_limit),
            ("precommit_finder_limit", self.precommit_finder_limit),
            ("proposal_finder_limit", self.proposal_finder_limit),
            ("max_block_transactions", self.max_block_transactions),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, limit)| *limit == 0) {
            return Err(ConsensusError::InvalidConfiguration(format!(
                "{name} must be greater than 0"
            )));
        }

        let budgets = [
            ("propose_max_calc_time", self.propose_max_calc_time),
            ("vote_max_calc_time", self.vote_max_calc_time),
            ("precommit_max_calc_time", self.precommit_max_calc_time),
            ("commit_max_calc_time", self.commit_max_calc_time),
        ];
        if let Some((name, _)) = budgets.iter().find(|(_, budget)| budget.is_zero()) {
            return Err(ConsensusError::InvalidConfiguration(format!(
                "{name} must be greater than 0"
            )));
        }
        Ok(())
    }
}

pub struct ConsensusConfigBuilder {
    config: ConsensusConfig,
}

impl ConsensusConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ConsensusConfig::default(),
        }
    }

    /// Start builder from an existing config (useful for partial updates)
    pub fn from_existing(config: ConsensusConfig) -> Self {
        Self { config }
    }

    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.config.queue_limit = limit;
        self
    }

    /// Set both lock limits: remembered proposals and counted block hashes.
    pub fn with_lock_limits(mut self, registered: usize, voted: usize) -> Self {
        self.config.lock_registered_limit = registered;
        self.config.lock_voted_limit = voted;
        self
    }

    /// Set the dedup pool limits, which also size the engine channels.
    pub fn with_pool_limits(
        mut self,
        propagate: usize,
        propose: usize,
        vote: usize,
        precommit: usize,
    ) -> Self {
        self.config.propagate_pool_limit = propagate;
        self.config.propose_pool_limit = propose;
        self.config.vote_pool_limit = vote;
        self.config.precommit_pool_limit = precommit;
        self
    }

    pub fn with_precommit_finder_limit(mut self, limit: usize) -> Self {
        self.config.precommit_finder_limit = limit;
        self
    }

    pub fn with_proposal_finder_limit(mut self, limit: usize) -> Self {
        self.config.proposal_finder_limit = limit;
        self
    }

    pub fn with_max_block_transactions(mut self, max: usize) -> Self {
        self.config.max_block_transactions = max;
        self
    }

    pub fn with_allowed_connect_delay(mut self, delay: Duration) -> Self {
        self.config.allowed_connect_delay = delay;
        self
    }

    /// Set the four per-phase calculation budgets.
    pub fn with_phase_budgets(
        mut self,
        propose: Duration,
        vote: Duration,
        precommit: Duration,
        commit: Duration,
    ) -> Self {
        self.config.propose_max_calc_time = propose;
        self.config.vote_max_calc_time = vote;
        self.config.precommit_max_calc_time = precommit;
        self.config.commit_max_calc_time = commit;
        self
    }

    /// Short budgets for clusters that share a process or a LAN.
    pub fn fast_preset(mut self) -> Self {
        self.config.allowed_connect_delay = Duration::from_millis(20);
        self.config.propose_max_calc_time = Duration::from_millis(100);
        self.config.vote_max_calc_time = Duration::from_millis(150);
        self.config.precommit_max_calc_time = Duration::from_millis(100);
        self.config.commit_max_calc_time = Duration::from_millis(50);
        self
    }

    pub fn validate(&self) -> Result<(), ConsensusError> {
        self.config.validate()
    }

    pub fn build(self) -> Result<ConsensusConfig, ConsensusError> {
        self.validate()?;
        Ok(self.config)
    }

    pub fn get_config(&self) -> ConsensusConfig {
        self.config.clone()
    }
}

impl Default for ConsensusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConsensusConfig::default();
        config.validate().expect("default config is valid");
        assert_eq!(config.queue_limit, 100);
        assert_eq!(config.lock_voted_limit, 500);
        assert_eq!(config.propagate_pool_limit, 1000);
        assert_eq!(config.allowed_connect_delay, Duration::from_millis(500));
    }

    #[test]
    fn builder_rejects_zero_capacity() {
        let err = ConsensusConfig::builder()
            .with_queue_limit(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidConfiguration(msg) if msg.contains("queue_limit")));
    }

    #[test]
    fn builder_rejects_zero_budget() {
        let err = ConsensusConfig::builder()
            .with_phase_budgets(
                Duration::ZERO,
                Duration::from_millis(1),
                Duration::from_millis(1),
                Duration::from_millis(1),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidConfiguration(_)));
    }

    #[test]
    fn from_existing_keeps_unchanged_fields() {
        let base = ConsensusConfig::builder().fast_preset().build().unwrap();
        let updated = ConsensusConfigBuilder::from_existing(base.clone())
            .with_max_block_transactions(5)
            .build()
            .unwrap();
        assert_eq!(updated.max_block_transactions, 5);
        assert_eq!(updated.vote_max_calc_time, base.vote_max_calc_time);
    }
}
