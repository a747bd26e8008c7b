//! Watcher configuration: contract addresses, endpoints and poll timing.

use crate::error::WatchError;
use alloy_primitives::{
    address,
    Address,
};
use std::time::Duration;
use url::Url;
use watchtower_types::ProtocolParameters;

/// The three protocol contracts plus the batching contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContractAddresses {
    /// The rollup (chain clock) contract.
    pub rollup: Address,
    /// The slashing proposer (rounds and tallies) contract.
    pub proposer: Address,
    /// The slasher (toggle, payloads, vetoes) contract.
    pub slasher: Address,
    /// A deployed Multicall3-compatible aggregator.
    pub multicall: Address,
}

/// Configuration settings for one watcher instance.
///
/// A multi-network deployment runs one fully independent instance (own
/// caches, own worker, own schedule) per network, each with its own
/// `Config`. Validated once by [`Config::validate`] before the service
/// starts; nothing in here mutates afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    /// Uri addresses of the ethereum clients. Several endpoints are
    /// combined into a quorum provider.
    pub rpc_endpoints: Vec<Url>,
    /// Contract identities on the monitored network.
    pub contracts: ContractAddresses,
    /// How often a sweep runs. The first sweep runs immediately.
    pub poll_interval: Duration,
    /// Hard bound on one sweep, so a wedged transport cannot suppress
    /// detections indefinitely.
    pub cycle_timeout: Duration,
    /// TTL for non-executed round records.
    pub round_cache_ttl: Duration,
    /// Bounded capacity of the round record TTL tier.
    pub round_cache_capacity: usize,
    /// TTL for details of non-executed rounds.
    pub detail_cache_ttl: Duration,
    /// Bounded capacity of the detail TTL tier.
    pub detail_cache_capacity: usize,
    /// How many rounds before the active execution zone to scan for
    /// already-executed slashings.
    pub history_scan_depth: u64,
    /// At most this many executed rounds are retained in the output.
    pub history_limit: usize,
    /// Fallback protocol parameters, used only when the on-chain load
    /// fails at startup.
    pub parameter_defaults: Option<ProtocolParameters>,
    /// Log cache and cycle stats every this many cycles (0 disables).
    pub stats_log_every: u64,
}

#[allow(missing_docs)]
impl Config {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(12);
    pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_ROUND_CACHE_TTL: Duration = Duration::from_secs(12);
    pub const DEFAULT_ROUND_CACHE_CAPACITY: usize = 256;
    pub const DEFAULT_DETAIL_CACHE_TTL: Duration = Duration::from_secs(60);
    pub const DEFAULT_DETAIL_CACHE_CAPACITY: usize = 64;
    pub const DEFAULT_HISTORY_SCAN_DEPTH: u64 = 16;
    pub const DEFAULT_HISTORY_LIMIT: usize = 8;
    pub const DEFAULT_STATS_LOG_EVERY: u64 = 50;

    /// The canonical Multicall3 deployment address.
    pub const DEFAULT_MULTICALL: Address =
        address!("cA11bde05977b3631167028862bE2a173976CA11");

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.rpc_endpoints.is_empty() {
            return Err(WatchError::Config("no rpc endpoints".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(WatchError::Config("poll interval must be non-zero".into()));
        }
        if self.cycle_timeout.is_zero() {
            return Err(WatchError::Config("cycle timeout must be non-zero".into()));
        }
        if self.round_cache_capacity == 0 || self.detail_cache_capacity == 0 {
            return Err(WatchError::Config(
                "cache capacities must be non-zero".into(),
            ));
        }
        if let Some(params) = &self.parameter_defaults {
            if params.round_size == 0 {
                return Err(WatchError::Config(
                    "parameter defaults: round size must be non-zero".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_endpoints: Vec::new(),
            contracts: ContractAddresses {
                rollup: Address::ZERO,
                proposer: Address::ZERO,
                slasher: Address::ZERO,
                multicall: Self::DEFAULT_MULTICALL,
            },
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            cycle_timeout: Self::DEFAULT_CYCLE_TIMEOUT,
            round_cache_ttl: Self::DEFAULT_ROUND_CACHE_TTL,
            round_cache_capacity: Self::DEFAULT_ROUND_CACHE_CAPACITY,
            detail_cache_ttl: Self::DEFAULT_DETAIL_CACHE_TTL,
            detail_cache_capacity: Self::DEFAULT_DETAIL_CACHE_CAPACITY,
            history_scan_depth: Self::DEFAULT_HISTORY_SCAN_DEPTH,
            history_limit: Self::DEFAULT_HISTORY_LIMIT,
            parameter_defaults: None,
            stats_log_every: Self::DEFAULT_STATS_LOG_EVERY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            rpc_endpoints: vec![Url::parse("http://localhost:8545").unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn default_config_without_endpoints_is_rejected() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn zero_intervals_and_capacities_are_rejected() {
        let mut c = valid();
        c.poll_interval = Duration::ZERO;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.round_cache_capacity = 0;
        assert!(c.validate().is_err());
    }
}
