//! Process-wide watcher metrics, prometheus style.

use once_cell::sync::Lazy;
use prometheus_client::{
    metrics::{
        counter::Counter,
        gauge::Gauge,
    },
    registry::Registry,
};
use parking_lot::Mutex;

/// Counters and gauges of the watcher.
pub struct WatcherMetrics {
    /// Registry the metrics below are registered in.
    pub registry: Mutex<Registry>,
    /// Completed sweeps.
    pub cycles: Counter,
    /// Sweeps that errored or timed out.
    pub cycle_failures: Counter,
    /// Batched network round trips issued.
    pub batch_round_trips: Counter,
    /// Round record cache hits.
    pub round_cache_hits: Counter,
    /// Round record cache misses.
    pub round_cache_misses: Counter,
    /// Round record cache promotions to the permanent tier.
    pub round_cache_promotions: Counter,
    /// Detail cache hits.
    pub detail_cache_hits: Counter,
    /// Detail cache misses.
    pub detail_cache_misses: Counter,
    /// Detail cache promotions to the permanent tier.
    pub detail_cache_promotions: Counter,
    /// Current permanent-tier size of the round record cache.
    pub round_cache_permanent_entries: Gauge,
    /// Current TTL-tier size of the round record cache.
    pub round_cache_ttl_entries: Gauge,
    /// Current permanent-tier size of the detail cache.
    pub detail_cache_permanent_entries: Gauge,
    /// Current TTL-tier size of the detail cache.
    pub detail_cache_ttl_entries: Gauge,
    /// Detections in the latest sweep.
    pub detections: Gauge,
    /// Actionable detections in the latest sweep.
    pub actionable_detections: Gauge,
}

impl WatcherMetrics {
    fn new() -> Self {
        let mut registry = Registry::default();

        let cycles = Counter::default();
        let cycle_failures = Counter::default();
        let batch_round_trips = Counter::default();
        let round_cache_hits = Counter::default();
        let round_cache_misses = Counter::default();
        let round_cache_promotions = Counter::default();
        let detail_cache_hits = Counter::default();
        let detail_cache_misses = Counter::default();
        let detail_cache_promotions = Counter::default();
        let round_cache_permanent_entries = Gauge::default();
        let round_cache_ttl_entries = Gauge::default();
        let detail_cache_permanent_entries = Gauge::default();
        let detail_cache_ttl_entries = Gauge::default();
        let detections = Gauge::default();
        let actionable_detections = Gauge::default();

        registry.register("sweep_cycles", "Completed sweeps", cycles.clone());
        registry.register(
            "sweep_cycle_failures",
            "Sweeps that errored or timed out",
            cycle_failures.clone(),
        );
        registry.register(
            "batch_round_trips",
            "Batched network round trips issued",
            batch_round_trips.clone(),
        );
        registry.register(
            "round_cache_hits",
            "Round record cache hits",
            round_cache_hits.clone(),
        );
        registry.register(
            "round_cache_misses",
            "Round record cache misses",
            round_cache_misses.clone(),
        );
        registry.register(
            "round_cache_promotions",
            "Round records promoted to the permanent tier",
            round_cache_promotions.clone(),
        );
        registry.register(
            "detail_cache_hits",
            "Detail cache hits",
            detail_cache_hits.clone(),
        );
        registry.register(
            "detail_cache_misses",
            "Detail cache misses",
            detail_cache_misses.clone(),
        );
        registry.register(
            "detail_cache_promotions",
            "Details promoted to the permanent tier",
            detail_cache_promotions.clone(),
        );
        registry.register(
            "round_cache_permanent_entries",
            "Current permanent-tier size of the round record cache",
            round_cache_permanent_entries.clone(),
        );
        registry.register(
            "round_cache_ttl_entries",
            "Current TTL-tier size of the round record cache",
            round_cache_ttl_entries.clone(),
        );
        registry.register(
            "detail_cache_permanent_entries",
            "Current permanent-tier size of the detail cache",
            detail_cache_permanent_entries.clone(),
        );
        registry.register(
            "detail_cache_ttl_entries",
            "Current TTL-tier size of the detail cache",
            detail_cache_ttl_entries.clone(),
        );
        registry.register(
            "detections",
            "Detections in the latest sweep",
            detections.clone(),
        );
        registry.register(
            "actionable_detections",
            "Actionable detections in the latest sweep",
            actionable_detections.clone(),
        );

        Self {
            registry: Mutex::new(registry),
            cycles,
            cycle_failures,
            batch_round_trips,
            round_cache_hits,
            round_cache_misses,
            round_cache_promotions,
            detail_cache_hits,
            detail_cache_misses,
            detail_cache_promotions,
            round_cache_permanent_entries,
            round_cache_ttl_entries,
            detail_cache_permanent_entries,
            detail_cache_ttl_entries,
            detections,
            actionable_detections,
        }
    }
}

static WATCHER_METRICS: Lazy<WatcherMetrics> = Lazy::new(WatcherMetrics::new);

/// The process-wide metrics instance.
pub fn watcher_metrics() -> &'static WatcherMetrics {
    &WATCHER_METRICS
}
