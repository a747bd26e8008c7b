//! End-to-end tests of the reader, engine and service against a mock
//! chain.

use alloy_primitives::{
    Address,
    U256,
};
use alloy_sol_types::SolCall;
use pretty_assertions::assert_eq;
use std::{
    sync::Arc,
    time::Duration,
};
use url::Url;
use watchtower_types::{
    ProtocolParameters,
    RoundStatus,
};
use watchtower_watcher::{
    abi::{
        proposer,
        rollup,
    },
    engine::DetectionEngine,
    error::WatchError,
    metrics::watcher_metrics,
    multicall::{
        aggregate,
        BatchCall,
    },
    ports::{
        DetectionRepository,
        InMemoryRepository,
        TracingNotifier,
        WatchAlert,
    },
    reader::StateReader,
    service::WatcherHandle,
    test_helpers::MockChain,
    Config,
    ContractAddresses,
};

fn params() -> ProtocolParameters {
    ProtocolParameters {
        round_size: 4,
        round_size_in_epochs: 4,
        execution_delay_rounds: 1,
        lifetime_rounds: 2,
        slash_offset_rounds: 2,
        quorum: 6,
        committee_size: 8,
        slot_duration: 12,
        epoch_duration: 96,
    }
}

fn contracts() -> ContractAddresses {
    ContractAddresses {
        rollup: Address::from([1u8; 20]),
        proposer: Address::from([2u8; 20]),
        slasher: Address::from([3u8; 20]),
        multicall: Config::DEFAULT_MULTICALL,
    }
}

fn config() -> Config {
    Config {
        rpc_endpoints: vec![Url::parse("http://127.0.0.1:8545").unwrap()],
        contracts: contracts(),
        // Records refetch every sweep so the tests observe drift
        // immediately; executed records still pin permanently.
        round_cache_ttl: Duration::ZERO,
        ..Default::default()
    }
}

async fn build_engine(chain: &MockChain, config: &Config) -> DetectionEngine<MockChain> {
    let reader = StateReader::connect(Arc::new(chain.clone()), config)
        .await
        .unwrap();
    DetectionEngine::new(reader, config)
}

/// One committee of two validators plus one slash action for `round`.
fn seed_actionable_round(chain: &MockChain, round: u64, votes: u64) {
    let validator = Address::from([0x42u8; 20]);
    chain.update(|d| {
        d.rounds.insert(round, (votes, false));
        d.committees
            .insert(round, vec![vec![validator, Address::from([0x43u8; 20])]]);
        d.actions
            .insert(round, vec![(validator, U256::from(32_000_000u64))]);
    });
}

#[tokio::test]
async fn batch_failure_is_isolated_to_the_failing_call() {
    let chain = MockChain::new(params());
    chain.update(|d| {
        d.current_slot = 77;
        d.current_epoch = 9;
        d.failing.insert(proposer::getRoundCall::SELECTOR);
    });

    let c = contracts();
    let calls = [
        BatchCall::new(c.rollup, &rollup::getCurrentSlotCall {}, "slot"),
        BatchCall::new(
            c.proposer,
            &proposer::getRoundCall {
                _round: U256::from(1),
            },
            "round",
        ),
        BatchCall::new(c.rollup, &rollup::getCurrentEpochCall {}, "epoch"),
    ];
    let outcomes = aggregate(&chain, c.multicall, &calls).await.unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        outcomes[0]
            .decode::<rollup::getCurrentSlotCall>()
            .unwrap()
            ._0,
        U256::from(77)
    );
    assert!(!outcomes[1].is_success());
    assert!(matches!(
        outcomes[1].decode::<proposer::getRoundCall>(),
        Err(WatchError::CallFailed { index: 1, .. })
    ));
    assert_eq!(
        outcomes[2]
            .decode::<rollup::getCurrentEpochCall>()
            .unwrap()
            ._0,
        U256::from(9)
    );
    assert_eq!(chain.eth_calls(), 1, "three calls cost one round trip");
}

#[tokio::test]
async fn a_short_batch_answer_is_rejected() {
    let chain = MockChain::new(params());
    chain.update(|d| d.truncate_batch = true);

    let c = contracts();
    let calls = [
        BatchCall::new(c.rollup, &rollup::getCurrentSlotCall {}, "slot"),
        BatchCall::new(c.rollup, &rollup::getCurrentEpochCall {}, "epoch"),
    ];
    let err = aggregate(&chain, c.multicall, &calls).await.unwrap_err();
    assert!(matches!(err, WatchError::BatchShape { sent: 2, got: 1 }));
}

#[tokio::test]
async fn protocol_parameters_load_from_chain() {
    let chain = MockChain::new(params());
    let reader = StateReader::connect(Arc::new(chain.clone()), &config())
        .await
        .unwrap();
    assert_eq!(reader.parameters(), &params());
    assert_eq!(chain.eth_calls(), 1);
}

#[tokio::test]
async fn parameter_defaults_cover_a_failed_load() {
    let chain = MockChain::new(params());
    chain.update(|d| d.fail_transport = true);

    let mut cfg = config();
    assert!(StateReader::connect(Arc::new(chain.clone()), &cfg)
        .await
        .is_err());

    cfg.parameter_defaults = Some(params());
    let reader = StateReader::connect(Arc::new(chain.clone()), &cfg)
        .await
        .unwrap();
    assert_eq!(reader.parameters(), &params());
}

#[tokio::test]
async fn executed_rounds_are_never_refetched() {
    let chain = MockChain::new(params());
    chain.update(|d| {
        d.rounds.insert(3, (7, true));
    });
    let mut reader = StateReader::connect(Arc::new(chain.clone()), &config())
        .await
        .unwrap();

    let first = reader.round(3).await.unwrap();
    assert!(first.is_executed);
    let after_first = chain.eth_calls();

    for _ in 0..3 {
        assert_eq!(reader.round(3).await.unwrap(), first);
    }
    assert_eq!(
        chain.eth_calls(),
        after_first,
        "an executed record must be served without remote calls"
    );
}

#[tokio::test]
async fn sweep_detects_a_round_in_its_veto_window() {
    let chain = MockChain::new(params());
    seed_actionable_round(&chain, 5, 6);
    // Round arithmetic says round 6 while the clock sits exactly on round
    // 5's executable slot.
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 28;
    });

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;
    let (snapshot, alerts) = engine.sweep().await.unwrap();

    assert_eq!(snapshot.cycle, 1);
    assert_eq!(snapshot.detections.len(), 1);
    let detection = &snapshot.detections[0];
    assert_eq!(detection.round(), 5);
    assert_eq!(detection.status, RoundStatus::InVetoWindow);
    assert_eq!(detection.target_epochs, Some(12..=15));
    let detail = detection.detail.as_ref().unwrap();
    assert_eq!(detail.actions.len(), 1);
    assert!(!detail.is_vetoed);
    let timing = detection.timing.unwrap();
    assert_eq!(timing.executable_slot, 28);
    assert_eq!(timing.seconds_until_executable, 0);
    assert_eq!(timing.expiry_slot, 32);

    // The backfill sweep seeds the actionable set silently.
    assert!(alerts.is_empty());

    // Identical chain state, identical output.
    let (again, _) = engine.sweep().await.unwrap();
    assert_eq!(again.detections, snapshot.detections);
}

#[tokio::test]
async fn slot_lag_holds_a_quorum_round_back() {
    let chain = MockChain::new(params());
    seed_actionable_round(&chain, 5, 6);
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 27;
    });

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;
    let (snapshot, _) = engine.sweep().await.unwrap();

    assert_eq!(snapshot.detections.len(), 1);
    assert_eq!(snapshot.detections[0].status, RoundStatus::QuorumReached);
}

#[tokio::test]
async fn zero_progress_rounds_are_filtered_by_the_voting_window() {
    let chain = MockChain::new(params());
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 27;
        // Current round, some votes: emitted while its window is open.
        d.rounds.insert(6, (2, false));
        // Below quorum and its voting window closed: dropped.
        d.rounds.insert(4, (3, false));
        // Zero votes: dropped.
        d.rounds.insert(5, (0, false));
    });

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;
    let (snapshot, _) = engine.sweep().await.unwrap();

    let rounds: Vec<u64> = snapshot.detections.iter().map(|d| d.round()).collect();
    assert_eq!(rounds, vec![6]);
    assert_eq!(snapshot.detections[0].status, RoundStatus::Voting);
    assert_eq!(snapshot.detections[0].detail, None);
}

#[tokio::test]
async fn quorum_with_an_empty_tally_is_dropped_entirely() {
    let chain = MockChain::new(params());
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 28;
        d.rounds.insert(5, (6, false));
        d.committees
            .insert(5, vec![vec![Address::from([0x42u8; 20])]]);
        // No slash actions tallied.
    });

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;
    let (snapshot, _) = engine.sweep().await.unwrap();
    assert!(snapshot.detections.is_empty());
}

#[tokio::test]
async fn detail_cache_invalidates_on_vote_drift_and_pins_on_execution() {
    let chain = MockChain::new(params());
    seed_actionable_round(&chain, 5, 6);
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 28;
    });

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;
    engine.sweep().await.unwrap();
    let after_first = chain.eth_calls();

    // Unchanged votes: position + round records only, detail from cache.
    engine.sweep().await.unwrap();
    assert_eq!(chain.eth_calls() - after_first, 2);

    // Vote drift invalidates the cached detail: four pipeline stages
    // rerun, and the lookup counts as a miss, not a hit.
    chain.update(|d| {
        d.rounds.insert(5, (7, false));
    });
    let before = chain.eth_calls();
    let stats_before = engine.detail_cache_stats();
    engine.sweep().await.unwrap();
    assert_eq!(chain.eth_calls() - before, 6);
    let stats = engine.detail_cache_stats();
    assert_eq!(stats.misses, stats_before.misses + 1);
    assert_eq!(stats.hits, stats_before.hits, "a drifted entry is not a hit");

    // Execution freezes both the record and the detail; later vote-count
    // noise no longer causes any refetch of round 5.
    chain.update(|d| {
        d.rounds.insert(5, (8, true));
    });
    engine.sweep().await.unwrap();
    chain.update(|d| {
        d.rounds.insert(5, (9, true));
    });
    let before = chain.eth_calls();
    let (snapshot, _) = engine.sweep().await.unwrap();
    // Position plus the volatile window records; no detail stages rerun.
    assert_eq!(chain.eth_calls() - before, 2);
    assert_eq!(snapshot.detections[0].status, RoundStatus::Executed);
    assert_eq!(snapshot.detections[0].record.vote_count, 8);
    assert_eq!(snapshot.detections[0].timing, None);
}

#[tokio::test]
async fn vetoed_payloads_are_reported_as_vetoed() {
    let chain = MockChain::new(params());
    let actions = vec![(Address::from([0x42u8; 20]), U256::from(32_000_000u64))];
    let payload = MockChain::payload_for(&actions);
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 28;
        d.rounds.insert(5, (6, false));
        d.committees
            .insert(5, vec![vec![Address::from([0x42u8; 20])]]);
        d.actions.insert(5, actions.clone());
        d.vetoed.insert(payload);
    });

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;
    let (snapshot, _) = engine.sweep().await.unwrap();

    let detail = snapshot.detections[0].detail.as_ref().unwrap();
    assert_eq!(detail.payload, payload);
    assert!(detail.is_vetoed);
}

#[tokio::test]
async fn history_scan_retains_a_capped_trailing_window() {
    let chain = MockChain::new(params());
    // Current round 10: active zone reaches down to round 8, history
    // covers rounds up to 7.
    chain.update(|d| {
        d.current_round = 10;
        d.current_slot = 43;
    });
    for round in [2u64, 5] {
        chain.update(|d| {
            d.rounds.insert(round, (7, true));
        });
        chain.update(|d| {
            d.committees
                .insert(round, vec![vec![Address::from([0x42u8; 20])]]);
            d.actions.insert(
                round,
                vec![(Address::from([0x42u8; 20]), U256::from(1u64))],
            );
        });
    }

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;
    let (snapshot, _) = engine.sweep().await.unwrap();
    let rounds: Vec<u64> = snapshot.detections.iter().map(|d| d.round()).collect();
    assert_eq!(rounds, vec![5, 2], "descending, executed history included");
    assert!(snapshot
        .detections
        .iter()
        .all(|d| d.status == RoundStatus::Executed));

    // A capped history keeps only the newest executed rounds.
    let cfg = Config {
        history_limit: 1,
        ..config()
    };
    let mut engine = build_engine(&chain, &cfg).await;
    let (snapshot, _) = engine.sweep().await.unwrap();
    let rounds: Vec<u64> = snapshot.detections.iter().map(|d| d.round()).collect();
    assert_eq!(rounds, vec![5]);
}

#[tokio::test]
async fn actionable_transitions_alert_once_excluding_backfill() {
    let chain = MockChain::new(params());
    seed_actionable_round(&chain, 5, 6);
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 28;
    });

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;

    // Round 5 is already actionable during the backfill: no alert.
    let (_, alerts) = engine.sweep().await.unwrap();
    assert!(alerts.is_empty());

    // Round 6 enters its veto window later: exactly one alert.
    seed_actionable_round(&chain, 6, 6);
    chain.update(|d| {
        d.current_round = 7;
        d.current_slot = 32;
    });
    let (_, alerts) = engine.sweep().await.unwrap();
    assert_eq!(
        alerts,
        vec![WatchAlert::RoundActionable {
            round: 6,
            status: RoundStatus::InVetoWindow,
            vote_count: 6,
        }]
    );

    let (_, alerts) = engine.sweep().await.unwrap();
    assert!(alerts.is_empty(), "a round alerts at most once");
}

#[tokio::test]
async fn slashing_toggle_flip_alerts() {
    let chain = MockChain::new(params());

    let cfg = config();
    let mut engine = build_engine(&chain, &cfg).await;
    let (_, alerts) = engine.sweep().await.unwrap();
    assert!(alerts.is_empty());

    chain.update(|d| {
        d.slashing_enabled = false;
        d.slashing_disabled_until = 1_700_000_123;
    });
    let (snapshot, alerts) = engine.sweep().await.unwrap();
    assert!(!snapshot.position.slashing_enabled);
    assert_eq!(
        alerts,
        vec![WatchAlert::SlashingToggled {
            enabled: false,
            disabled_until: 1_700_000_123,
        }]
    );

    let (_, alerts) = engine.sweep().await.unwrap();
    assert!(alerts.is_empty());
}

#[tokio::test]
async fn service_backfills_stores_and_shuts_down() {
    let chain = MockChain::new(params());
    seed_actionable_round(&chain, 5, 6);
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 28;
    });

    let cfg = Config {
        poll_interval: Duration::from_millis(20),
        ..config()
    };
    let repository = Arc::new(InMemoryRepository::new());
    let mut handle = WatcherHandle::start_test(
        Arc::new(chain.clone()),
        cfg,
        Arc::clone(&repository) as Arc<dyn DetectionRepository>,
        Arc::new(TracingNotifier),
    )
    .await
    .unwrap();

    handle.await_first_sweep().await.unwrap();
    assert!(handle.is_running());

    let snapshot = handle.latest().unwrap();
    assert!(snapshot.cycle >= 1);
    assert_eq!(snapshot.detections.len(), 1);
    assert_eq!(repository.detection(5).unwrap().round(), 5);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_wedged_sweep_is_abandoned_at_the_cycle_timeout() {
    let chain = MockChain::new(params());
    seed_actionable_round(&chain, 5, 6);
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 28;
    });

    let cfg = Config {
        poll_interval: Duration::from_millis(20),
        cycle_timeout: Duration::from_millis(200),
        ..config()
    };
    let failures_before = watcher_metrics().cycle_failures.get();
    let repository = Arc::new(InMemoryRepository::new());
    let mut handle = WatcherHandle::start_test(
        Arc::new(chain.clone()),
        cfg,
        Arc::clone(&repository) as Arc<dyn DetectionRepository>,
        Arc::new(TracingNotifier),
    )
    .await
    .unwrap();

    // Wedge the transport before the worker gets to run its first sweep.
    chain.update(|d| d.call_delay = Some(Duration::from_secs(3600)));

    // Well past the cycle timeout: the sweep must have been abandoned,
    // counted, and must not have produced a snapshot.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        watcher_metrics().cycle_failures.get() > failures_before,
        "an abandoned sweep is a counted cycle failure"
    );
    assert_eq!(handle.latest(), None);
    assert!(handle.is_running());

    // Unwedged, the next cycle completes normally.
    chain.update(|d| d.call_delay = None);
    handle.await_first_sweep().await.unwrap();
    assert_eq!(handle.latest().unwrap().detections.len(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_cycles_do_not_kill_the_service() {
    let chain = MockChain::new(params());
    seed_actionable_round(&chain, 5, 6);
    chain.update(|d| {
        d.current_round = 6;
        d.current_slot = 28;
        d.fail_transport = true;
    });

    let cfg = Config {
        poll_interval: Duration::from_millis(10),
        parameter_defaults: Some(params()),
        ..config()
    };
    let repository = Arc::new(InMemoryRepository::new());
    let mut handle = WatcherHandle::start_test(
        Arc::new(chain.clone()),
        cfg,
        Arc::clone(&repository) as Arc<dyn DetectionRepository>,
        Arc::new(TracingNotifier),
    )
    .await
    .unwrap();

    // Let a few cycles fail, then heal the transport.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.is_running());
    assert_eq!(handle.latest(), None);

    chain.update(|d| d.fail_transport = false);
    handle.await_first_sweep().await.unwrap();
    assert_eq!(handle.latest().unwrap().detections.len(), 1);

    handle.shutdown().await.unwrap();
}
