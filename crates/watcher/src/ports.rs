//! Outbound ports of the watcher service.
//!
//! The service pushes every sweep into a [`DetectionRepository`] and every
//! state transition worth an operator's attention into a [`Notifier`].
//! Production deployments plug their own sinks in; the in-memory
//! implementations below are the defaults and the test doubles.

use parking_lot::RwLock;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;
use watchtower_types::{
    ChainPosition,
    DetectedSlashing,
    Round,
    RoundStatus,
    SweepSnapshot,
};

/// A state transition the watcher considers worth pushing, as opposed to
/// the full [`SweepSnapshot`] it stores every cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum WatchAlert {
    /// A round became actionable (entered its veto window or became
    /// executable) for the first time since the watcher started.
    RoundActionable {
        /// The round in question.
        round: Round,
        /// The status it transitioned into.
        status: RoundStatus,
        /// Votes the round had when the transition was observed.
        vote_count: u64,
    },
    /// The chain-wide slashing toggle flipped.
    SlashingToggled {
        /// The new state of the toggle.
        enabled: bool,
        /// Unix timestamp until which slashing stays disabled (0 when
        /// enabled).
        disabled_until: u64,
    },
}

/// Sink for the full output of every sweep.
#[async_trait::async_trait]
pub trait DetectionRepository: Send + Sync {
    /// Store one sweep's snapshot.
    async fn store(&self, snapshot: &SweepSnapshot) -> anyhow::Result<()>;
}

/// Sink for operator-facing alerts.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert.
    async fn notify(&self, alert: &WatchAlert) -> anyhow::Result<()>;
}

#[derive(Default)]
struct RepositoryInner {
    latest: Option<SweepSnapshot>,
    by_round: BTreeMap<Round, DetectedSlashing>,
}

/// Keeps the latest snapshot plus a per-round index merged across sweeps,
/// so a round that drops out of the observation window stays queryable.
#[derive(Default)]
pub struct InMemoryRepository {
    inner: RwLock<RepositoryInner>,
}

impl InMemoryRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently stored snapshot.
    pub fn latest(&self) -> Option<SweepSnapshot> {
        self.inner.read().latest.clone()
    }

    /// The chain position of the most recent sweep.
    pub fn position(&self) -> Option<ChainPosition> {
        self.inner.read().latest.as_ref().map(|s| s.position)
    }

    /// The last detection recorded for `round`, from any past sweep.
    pub fn detection(&self, round: Round) -> Option<DetectedSlashing> {
        self.inner.read().by_round.get(&round).cloned()
    }

    /// All detections ever recorded, ascending by round.
    pub fn all_detections(&self) -> Vec<DetectedSlashing> {
        self.inner.read().by_round.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl DetectionRepository for InMemoryRepository {
    async fn store(&self, snapshot: &SweepSnapshot) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        for detection in &snapshot.detections {
            inner
                .by_round
                .insert(detection.round(), detection.clone());
        }
        inner.latest = Some(snapshot.clone());
        Ok(())
    }
}

/// Notifier that writes alerts to the log.
#[derive(Default)]
pub struct TracingNotifier;

#[async_trait::async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, alert: &WatchAlert) -> anyhow::Result<()> {
        match alert {
            WatchAlert::RoundActionable {
                round,
                status,
                vote_count,
            } => {
                tracing::warn!(
                    round,
                    %status,
                    vote_count,
                    "slashing round is actionable"
                );
            }
            WatchAlert::SlashingToggled {
                enabled,
                disabled_until,
            } => {
                tracing::warn!(enabled, disabled_until, "slashing toggle flipped");
            }
        }
        Ok(())
    }
}
