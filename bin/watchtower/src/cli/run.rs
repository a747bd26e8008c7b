use alloy_primitives::Address;
use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use url::Url;
use watchtower_watcher::{
    metrics::watcher_metrics,
    Config,
    ContractAddresses,
    WatcherHandle,
};

#[derive(Debug, Parser)]
pub struct Command {
    /// Ethereum RPC endpoints. Several endpoints are combined into a
    /// majority-quorum provider.
    #[clap(
        long = "rpc",
        env = "WATCHTOWER_RPC",
        value_delimiter = ',',
        required = true
    )]
    pub rpc: Vec<Url>,

    /// The rollup (chain clock) contract.
    #[clap(long, env = "WATCHTOWER_ROLLUP_CONTRACT")]
    pub rollup_contract: Address,

    /// The slashing proposer contract.
    #[clap(long, env = "WATCHTOWER_PROPOSER_CONTRACT")]
    pub proposer_contract: Address,

    /// The slasher contract.
    #[clap(long, env = "WATCHTOWER_SLASHER_CONTRACT")]
    pub slasher_contract: Address,

    /// A deployed Multicall3-compatible aggregator.
    #[clap(
        long,
        env = "WATCHTOWER_MULTICALL_CONTRACT",
        default_value_t = Config::DEFAULT_MULTICALL
    )]
    pub multicall_contract: Address,

    /// How often a sweep runs.
    #[clap(long, default_value = "12s")]
    pub poll_interval: humantime::Duration,

    /// Hard bound on one sweep.
    #[clap(long, default_value = "30s")]
    pub cycle_timeout: humantime::Duration,

    /// TTL for non-executed round records.
    #[clap(long, default_value = "12s")]
    pub round_cache_ttl: humantime::Duration,

    #[clap(long, default_value_t = Config::DEFAULT_ROUND_CACHE_CAPACITY)]
    pub round_cache_capacity: usize,

    /// TTL for details of non-executed rounds.
    #[clap(long, default_value = "60s")]
    pub detail_cache_ttl: humantime::Duration,

    #[clap(long, default_value_t = Config::DEFAULT_DETAIL_CACHE_CAPACITY)]
    pub detail_cache_capacity: usize,

    /// How many rounds before the active execution zone to scan for
    /// already-executed slashings.
    #[clap(long, default_value_t = Config::DEFAULT_HISTORY_SCAN_DEPTH)]
    pub history_scan_depth: u64,

    /// At most this many executed rounds are retained in the output.
    #[clap(long, default_value_t = Config::DEFAULT_HISTORY_LIMIT)]
    pub history_limit: usize,

    /// Log cache and cycle stats every this many cycles (0 disables).
    #[clap(long, default_value_t = Config::DEFAULT_STATS_LOG_EVERY)]
    pub stats_log_every: u64,

    /// Serve prometheus metrics under `/metrics` at this address.
    #[clap(long, env = "WATCHTOWER_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Command {
    fn config(&self) -> Config {
        Config {
            rpc_endpoints: self.rpc.clone(),
            contracts: ContractAddresses {
                rollup: self.rollup_contract,
                proposer: self.proposer_contract,
                slasher: self.slasher_contract,
                multicall: self.multicall_contract,
            },
            poll_interval: self.poll_interval.into(),
            cycle_timeout: self.cycle_timeout.into(),
            round_cache_ttl: self.round_cache_ttl.into(),
            round_cache_capacity: self.round_cache_capacity,
            detail_cache_ttl: self.detail_cache_ttl.into(),
            detail_cache_capacity: self.detail_cache_capacity,
            history_scan_depth: self.history_scan_depth,
            history_limit: self.history_limit,
            parameter_defaults: None,
            stats_log_every: self.stats_log_every,
        }
    }
}

pub async fn exec(command: Command) -> anyhow::Result<()> {
    if let Some(addr) = command.metrics_addr {
        tokio::spawn(serve_metrics(addr));
    }

    tracing::info!(endpoints = command.rpc.len(), "starting watcher");
    let mut handle = WatcherHandle::start(command.config()).await?;

    handle.await_first_sweep().await?;
    if let Some(snapshot) = handle.latest() {
        tracing::info!(
            current_round = snapshot.position.current_round,
            detections = snapshot.detections.len(),
            "initial sweep complete"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    tracing::info!("received shutdown signal");
    handle.shutdown().await
}

async fn serve_metrics(addr: SocketAddr) {
    use axum::{
        routing::get,
        Router,
    };

    let app = Router::new().route("/metrics", get(metrics_handler));
    tracing::info!(%addr, "serving metrics");
    if let Err(err) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
        tracing::error!("metrics server failed: {err}");
    }
}

async fn metrics_handler() -> String {
    let mut body = String::new();
    let registry = watcher_metrics().registry.lock();
    let _ = prometheus_client::encoding::text::encode(&mut body, &registry);
    body
}
