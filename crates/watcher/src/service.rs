//! The background worker: one task per monitored network.
//!
//! The handle owns the spawned task. Cycles never overlap: a slow sweep
//! delays the next tick, never runs concurrently with it. A failed or
//! timed-out sweep is logged and counted; the previous snapshot stays
//! authoritative until the next cycle succeeds.

use crate::{
    config::Config,
    engine::DetectionEngine,
    error::WatchError,
    metrics::watcher_metrics,
    ports::{
        DetectionRepository,
        InMemoryRepository,
        Notifier,
        TracingNotifier,
    },
    reader::StateReader,
};
use ethers_providers::{
    Http,
    Middleware,
    Provider,
    ProviderError,
    Quorum,
    QuorumProvider,
    WeightedProvider,
};
use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use url::Url;
use watchtower_types::SweepSnapshot;

type EthNode = Provider<QuorumProvider<Http>>;

/// Combine the configured endpoints into one majority-quorum provider, so
/// a single lagging or faulty endpoint cannot feed the watcher stale
/// state.
fn build_eth_node(urls: &[Url]) -> Result<EthNode, WatchError> {
    let endpoints: Vec<WeightedProvider<Http>> = urls
        .iter()
        .map(|url| WeightedProvider::new(Http::new(url.clone())))
        .collect();
    let quorum = QuorumProvider::builder()
        .add_providers(endpoints)
        .quorum(Quorum::Majority)
        .build();
    Ok(Provider::new(quorum))
}

/// Handle to a running watcher task.
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    snapshot: watch::Receiver<Option<SweepSnapshot>>,
    join: JoinHandle<()>,
}

impl WatcherHandle {
    /// Start a watcher with the default in-memory repository and logging
    /// notifier.
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        Self::start_with(
            config,
            Arc::new(InMemoryRepository::new()),
            Arc::new(TracingNotifier),
        )
        .await
    }

    /// Start a watcher pushing into the given sinks.
    pub async fn start_with(
        config: Config,
        repository: Arc<dyn DetectionRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let eth_node = Arc::new(build_eth_node(&config.rpc_endpoints)?);
        Self::start_inner(eth_node, config, repository, notifier).await
    }

    /// Start a watcher against an arbitrary middleware, bypassing the
    /// quorum provider. Test entry point.
    #[cfg(any(test, feature = "test-helpers"))]
    pub async fn start_test<P>(
        eth_node: Arc<P>,
        config: Config,
        repository: Arc<dyn DetectionRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self>
    where
        P: Middleware<Error = ProviderError> + 'static,
    {
        config.validate()?;
        Self::start_inner(eth_node, config, repository, notifier).await
    }

    async fn start_inner<P>(
        eth_node: Arc<P>,
        config: Config,
        repository: Arc<dyn DetectionRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self>
    where
        P: Middleware<Error = ProviderError> + 'static,
    {
        let reader = StateReader::connect(eth_node, &config).await?;
        let engine = DetectionEngine::new(reader, &config);

        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));

        let join = tokio::spawn(run(
            engine,
            config,
            repository,
            notifier,
            snapshot_tx,
            shutdown_rx,
            Arc::clone(&running),
        ));

        Ok(Self {
            running,
            shutdown: shutdown_tx,
            snapshot: snapshot_rx,
            join,
        })
    }

    /// Whether the worker task is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// The latest completed sweep, if any cycle has succeeded yet.
    pub fn latest(&self) -> Option<SweepSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// A receiver that observes every completed sweep.
    pub fn subscribe(&self) -> watch::Receiver<Option<SweepSnapshot>> {
        self.snapshot.clone()
    }

    /// Wait until the initial backfill sweep has completed.
    pub async fn await_first_sweep(&mut self) -> anyhow::Result<()> {
        while self.snapshot.borrow().is_none() {
            self.snapshot.changed().await?;
        }
        Ok(())
    }

    /// Stop the worker and wait for it to finish the cycle in flight.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        self.join.await?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run<P>(
    mut engine: DetectionEngine<P>,
    config: Config,
    repository: Arc<dyn DetectionRepository>,
    notifier: Arc<dyn Notifier>,
    snapshots: watch::Sender<Option<SweepSnapshot>>,
    mut shutdown: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
) where
    P: Middleware<Error = ProviderError> + 'static,
{
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        match tokio::time::timeout(config.cycle_timeout, engine.sweep()).await {
            Ok(Ok((snapshot, alerts))) => {
                for alert in &alerts {
                    if let Err(err) = notifier.notify(alert).await {
                        tracing::warn!("notifier rejected an alert: {err:#}");
                    }
                }
                if let Err(err) = repository.store(&snapshot).await {
                    tracing::warn!("repository rejected a snapshot: {err:#}");
                }
                log_cycle(&engine, &config, &snapshot);
                snapshots.send_replace(Some(snapshot));
            }
            Ok(Err(err)) => {
                watcher_metrics().cycle_failures.inc();
                tracing::error!("sweep failed, retrying next interval: {err}");
            }
            Err(_) => {
                watcher_metrics().cycle_failures.inc();
                tracing::error!(
                    "sweep exceeded the cycle timeout of {:?}",
                    config.cycle_timeout
                );
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    tracing::info!("watcher stopped");
}

fn log_cycle<P>(
    engine: &DetectionEngine<P>,
    config: &Config,
    snapshot: &SweepSnapshot,
) where
    P: Middleware<Error = ProviderError> + 'static,
{
    tracing::debug!(
        cycle = snapshot.cycle,
        current_round = snapshot.position.current_round,
        detections = snapshot.detections.len(),
        "sweep complete"
    );
    if config.stats_log_every > 0 && snapshot.cycle % config.stats_log_every == 0 {
        let rounds = engine.round_cache_stats();
        let details = engine.detail_cache_stats();
        tracing::info!(
            cycle = snapshot.cycle,
            round_hits = rounds.hits,
            round_misses = rounds.misses,
            round_permanent = rounds.permanent_entries,
            detail_hits = details.hits,
            detail_misses = details.misses,
            detail_permanent = details.permanent_entries,
            "cache stats"
        );
    }
}
