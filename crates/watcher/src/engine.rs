//! The per-cycle sweep: window arithmetic, detail policy, alerts.
//!
//! A sweep is pure with respect to the chain: it reads the current
//! position, derives the observation window, classifies every round in it
//! and assembles the cycle's detections. Running it twice against
//! identical chain and cache state yields identical output.

use crate::{
    cache::{
        CacheStats,
        TieredCache,
    },
    config::Config,
    error::WatchError,
    metrics::watcher_metrics,
    ports::WatchAlert,
    reader::{
        set_counter,
        StateReader,
    },
};
use ethers_providers::{
    Middleware,
    ProviderError,
};
use std::{
    collections::HashSet,
    time::Duration,
};
use watchtower_types::{
    status::{
        history_window,
        observation_window,
        round_status,
        target_epochs,
        timing,
        voting_window_open,
    },
    DetectedSlashing,
    ProtocolParameters,
    Round,
    RoundDetail,
    RoundRecord,
    RoundStatus,
    SweepSnapshot,
};

/// A round detail plus the record state it was derived from. The vote
/// count pins validity: a drifted count invalidates the entry unless the
/// round is executed, which freezes it forever.
#[derive(Clone)]
struct CachedDetail {
    vote_count: u64,
    executed: bool,
    detail: RoundDetail,
}

struct Candidate {
    record: RoundRecord,
    status: RoundStatus,
}

/// Drives sweeps against one network and owns all per-network caches.
pub struct DetectionEngine<P> {
    reader: StateReader<P>,
    params: ProtocolParameters,
    details: TieredCache<Round, CachedDetail>,
    detail_ttl: Duration,
    history_scan_depth: u64,
    history_limit: usize,
    cycle: u64,
    // Rounds already alerted as actionable; pre-seeded by the backfill
    // sweep so only fresh transitions reach the notifier.
    seen_actionable: HashSet<Round>,
    last_enabled: Option<bool>,
}

impl<P> DetectionEngine<P>
where
    P: Middleware<Error = ProviderError> + 'static,
{
    /// Build an engine around a connected reader.
    pub fn new(reader: StateReader<P>, config: &Config) -> Self {
        let params = reader.parameters().clone();
        Self {
            reader,
            params,
            details: TieredCache::new(config.detail_cache_capacity, |d: &CachedDetail| {
                d.executed
            }),
            detail_ttl: config.detail_cache_ttl,
            history_scan_depth: config.history_scan_depth,
            history_limit: config.history_limit,
            cycle: 0,
            seen_actionable: HashSet::new(),
            last_enabled: None,
        }
    }

    /// The protocol parameters the engine runs with.
    pub fn parameters(&self) -> &ProtocolParameters {
        &self.params
    }

    /// Counters of the round record cache.
    pub fn round_cache_stats(&self) -> CacheStats {
        self.reader.round_cache_stats()
    }

    /// Counters of the detail cache.
    pub fn detail_cache_stats(&self) -> CacheStats {
        self.details.stats()
    }

    /// Run one full sweep. Returns the cycle's snapshot and the alerts it
    /// raised. The first sweep is the historical backfill: it seeds the
    /// actionable set without alerting on it.
    pub async fn sweep(
        &mut self,
    ) -> Result<(SweepSnapshot, Vec<WatchAlert>), WatchError> {
        let backfill = self.cycle == 0;
        self.cycle = self.cycle.saturating_add(1);

        let position = self.reader.chain_position().await?;

        // One batch covers both the observation window and the bounded
        // executed-history look-back behind it.
        let window = observation_window(position.current_round, &self.params);
        let history = history_window(
            position.current_round,
            &self.params,
            self.history_scan_depth,
        );
        let mut wanted = history.clone();
        wanted.extend(window.iter().copied());
        let history_set: HashSet<Round> = history.into_iter().collect();

        let mut observed: Vec<RoundRecord> = Vec::new();
        let mut executed_history: Vec<RoundRecord> = Vec::new();
        for (round, result) in self.reader.rounds(&wanted).await? {
            match result {
                Ok(record) if history_set.contains(&round) => {
                    if record.is_executed {
                        executed_history.push(record);
                    }
                }
                Ok(record) => observed.push(record),
                Err(err) => {
                    tracing::warn!(round, "round record unavailable this cycle: {err}");
                }
            }
        }
        // Trailing history is capped; keep the newest rounds.
        let overflow = executed_history
            .len()
            .saturating_sub(self.history_limit);
        let executed_history = executed_history.split_off(overflow);

        // Classify. Rounds with a quorum in a live status (and every
        // executed round) get the detail pipeline; the rest are emitted
        // bare, but only while votes can still arrive for them.
        let mut plain: Vec<Candidate> = Vec::new();
        let mut detailed: Vec<Candidate> = Vec::new();
        for record in observed {
            let status = round_status(&record, &position, &self.params);
            if self.wants_detail(&record, status) {
                detailed.push(Candidate { record, status });
            } else if record.vote_count > 0
                && voting_window_open(record.round, position.current_round, &self.params)
            {
                plain.push(Candidate { record, status });
            }
        }
        for record in executed_history {
            detailed.push(Candidate {
                record,
                status: RoundStatus::Executed,
            });
        }

        let resolved = self.resolve_details(detailed).await?;

        let mut detections: Vec<DetectedSlashing> = plain
            .into_iter()
            .map(|candidate| self.detection(candidate, None, &position))
            .chain(
                resolved
                    .into_iter()
                    .map(|(candidate, detail)| {
                        self.detection(candidate, detail, &position)
                    }),
            )
            .collect();
        detections.sort_by(|a, b| b.round().cmp(&a.round()));

        let alerts = self.raise_alerts(&position, &detections, backfill);

        self.publish_metrics(&detections);

        let completed_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Ok((
            SweepSnapshot {
                cycle: self.cycle,
                completed_at,
                position,
                detections,
            },
            alerts,
        ))
    }

    fn wants_detail(&self, record: &RoundRecord, status: RoundStatus) -> bool {
        record.is_executed
            || (self.params.has_quorum(record.vote_count)
                && matches!(
                    status,
                    RoundStatus::QuorumReached
                        | RoundStatus::InVetoWindow
                        | RoundStatus::Executable
                ))
    }

    /// Cache-first detail lookup for every candidate, with the misses
    /// batched through the four-stage pipeline. Rounds whose tally came
    /// back empty are dropped from the output entirely.
    async fn resolve_details(
        &mut self,
        candidates: Vec<Candidate>,
    ) -> Result<Vec<(Candidate, Option<RoundDetail>)>, WatchError> {
        let mut resolved: Vec<(Candidate, Option<RoundDetail>)> = Vec::new();
        let mut misses: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            let round = candidate.record.round;
            // A drifted vote count means the cached tally no longer
            // matches the round; that lookup is a miss, not a hit.
            // Executed entries sit in the permanent tier and skip the
            // check.
            let cached = self.details.get_if(&round, |cached| {
                cached.vote_count == candidate.record.vote_count
            });
            match cached {
                Some(cached) => resolved.push((candidate, Some(cached.detail))),
                None => misses.push(candidate),
            }
        }

        let miss_rounds: Vec<Round> =
            misses.iter().map(|c| c.record.round).collect();
        let fetched = self.reader.details(&miss_rounds).await?;
        for (candidate, (round, result)) in misses.into_iter().zip(fetched) {
            match result {
                Ok(detail) => {
                    if detail.actions.is_empty() {
                        tracing::debug!(round, "quorum with empty tally, dropping");
                        continue;
                    }
                    self.details.set(
                        round,
                        CachedDetail {
                            vote_count: candidate.record.vote_count,
                            executed: candidate.record.is_executed,
                            detail: detail.clone(),
                        },
                        self.detail_ttl,
                    );
                    resolved.push((candidate, Some(detail)));
                }
                Err(err) => {
                    tracing::warn!(round, "detail unavailable this cycle: {err}");
                    resolved.push((candidate, None));
                }
            }
        }
        Ok(resolved)
    }

    fn detection(
        &self,
        candidate: Candidate,
        detail: Option<RoundDetail>,
        position: &watchtower_types::ChainPosition,
    ) -> DetectedSlashing {
        let round = candidate.record.round;
        let timing = (candidate.status != RoundStatus::Executed)
            .then(|| timing(round, position, &self.params));
        DetectedSlashing {
            record: candidate.record,
            status: candidate.status,
            detail,
            target_epochs: target_epochs(round, &self.params),
            timing,
        }
    }

    fn raise_alerts(
        &mut self,
        position: &watchtower_types::ChainPosition,
        detections: &[DetectedSlashing],
        backfill: bool,
    ) -> Vec<WatchAlert> {
        let mut alerts = Vec::new();

        if let Some(previous) = self.last_enabled {
            if previous != position.slashing_enabled {
                alerts.push(WatchAlert::SlashingToggled {
                    enabled: position.slashing_enabled,
                    disabled_until: position.slashing_disabled_until,
                });
            }
        }
        self.last_enabled = Some(position.slashing_enabled);

        for detection in detections {
            if detection.status.is_actionable()
                && self.seen_actionable.insert(detection.round())
                && !backfill
            {
                alerts.push(WatchAlert::RoundActionable {
                    round: detection.round(),
                    status: detection.status,
                    vote_count: detection.record.vote_count,
                });
            }
        }

        alerts
    }

    fn publish_metrics(&self, detections: &[DetectedSlashing]) {
        let metrics = watcher_metrics();
        metrics.cycles.inc();
        let actionable = detections
            .iter()
            .filter(|d| d.status.is_actionable())
            .count();
        metrics
            .detections
            .set(i64::try_from(detections.len()).unwrap_or(i64::MAX));
        metrics
            .actionable_detections
            .set(i64::try_from(actionable).unwrap_or(i64::MAX));
        let stats = self.details.stats();
        set_counter(&metrics.detail_cache_hits, stats.hits);
        set_counter(&metrics.detail_cache_misses, stats.misses);
        set_counter(&metrics.detail_cache_promotions, stats.promotions);
        metrics
            .detail_cache_permanent_entries
            .set(i64::try_from(stats.permanent_entries).unwrap_or(i64::MAX));
        metrics
            .detail_cache_ttl_entries
            .set(i64::try_from(stats.ttl_entries).unwrap_or(i64::MAX));
    }
}
