//! Reads protocol state with a small constant number of round trips.
//!
//! Every operation here funnels through [`crate::multicall::aggregate`]:
//! protocol parameters are one batch at startup, the chain position is one
//! batch per cycle, round records are one batch covering only cache
//! misses, and the detail pipeline is four batches for any number of
//! rounds (committees, tallies, payload addresses, veto flags).
//!
//! Remote failures are surfaced, never swallowed: multi-round operations
//! return one `Result` per requested round so the engine can skip exactly
//! the rounds it could not observe this cycle.

use crate::{
    abi::{
        proposer,
        rollup,
        slasher,
    },
    cache::{
        CacheStats,
        TieredCache,
    },
    config::{
        Config,
        ContractAddresses,
    },
    error::WatchError,
    metrics::watcher_metrics,
    multicall::{
        aggregate,
        BatchCall,
    },
};
use alloy_primitives::{
    Address,
    U256,
};
use ethers_providers::{
    Middleware,
    ProviderError,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use watchtower_types::{
    ChainPosition,
    Committee,
    ProtocolParameters,
    Round,
    RoundDetail,
    RoundRecord,
    SlashAction,
};

fn to_u64(value: U256, what: &'static str) -> Result<u64, WatchError> {
    u64::try_from(value).map_err(|_| WatchError::OutOfRange { what })
}

/// Cache-first reader of the slashing protocol's on-chain state.
pub struct StateReader<P> {
    eth_node: Arc<P>,
    contracts: ContractAddresses,
    params: ProtocolParameters,
    rounds: TieredCache<Round, RoundRecord>,
    round_ttl: Duration,
}

impl<P> StateReader<P>
where
    P: Middleware<Error = ProviderError> + 'static,
{
    /// Load the protocol parameters (one batched call) and build the
    /// reader. When the load fails and the config carries parameter
    /// defaults, those are used instead.
    pub async fn connect(
        eth_node: Arc<P>,
        config: &Config,
    ) -> Result<Self, WatchError> {
        let contracts = config.contracts;
        let params =
            match load_protocol_parameters(eth_node.as_ref(), &contracts).await {
                Ok(params) => params,
                Err(err) => match &config.parameter_defaults {
                    Some(defaults) => {
                        tracing::warn!(
                            "failed to load protocol parameters, falling back to \
                             configured defaults: {err}"
                        );
                        defaults.clone()
                    }
                    None => return Err(err),
                },
            };
        if params.round_size == 0 {
            return Err(WatchError::OutOfRange {
                what: "round size",
            });
        }

        Ok(Self {
            eth_node,
            contracts,
            params,
            rounds: TieredCache::new(config.round_cache_capacity, |record| {
                record.is_executed
            }),
            round_ttl: config.round_cache_ttl,
        })
    }

    /// The parameters loaded at startup.
    pub fn parameters(&self) -> &ProtocolParameters {
        &self.params
    }

    /// Counters of the round record cache.
    pub fn round_cache_stats(&self) -> CacheStats {
        self.rounds.stats()
    }

    /// Where the chain is right now. One batched call, never cached:
    /// every other staleness judgement is made relative to this.
    pub async fn chain_position(&self) -> Result<ChainPosition, WatchError> {
        let calls = [
            BatchCall::new(
                self.contracts.proposer,
                &proposer::getCurrentRoundCall {},
                "getCurrentRound",
            ),
            BatchCall::new(
                self.contracts.rollup,
                &rollup::getCurrentSlotCall {},
                "getCurrentSlot",
            ),
            BatchCall::new(
                self.contracts.rollup,
                &rollup::getCurrentEpochCall {},
                "getCurrentEpoch",
            ),
            BatchCall::new(
                self.contracts.slasher,
                &slasher::isSlashingEnabledCall {},
                "isSlashingEnabled",
            ),
            BatchCall::new(
                self.contracts.slasher,
                &slasher::slashingDisabledUntilCall {},
                "slashingDisabledUntil",
            ),
            BatchCall::new(
                self.contracts.slasher,
                &slasher::SLASHING_DISABLE_DURATIONCall {},
                "slashingDisableDuration",
            ),
        ];
        let outcomes =
            aggregate(self.eth_node.as_ref(), self.contracts.multicall, &calls).await?;

        Ok(ChainPosition {
            current_round: to_u64(
                outcomes[0].decode::<proposer::getCurrentRoundCall>()?._0,
                "current round",
            )?,
            current_slot: to_u64(
                outcomes[1].decode::<rollup::getCurrentSlotCall>()?._0,
                "current slot",
            )?,
            current_epoch: to_u64(
                outcomes[2].decode::<rollup::getCurrentEpochCall>()?._0,
                "current epoch",
            )?,
            slashing_enabled: outcomes[3]
                .decode::<slasher::isSlashingEnabledCall>()?
                ._0,
            slashing_disabled_until: to_u64(
                outcomes[4].decode::<slasher::slashingDisabledUntilCall>()?._0,
                "slashing disabled until",
            )?,
            slashing_disable_duration: to_u64(
                outcomes[5]
                    .decode::<slasher::SLASHING_DISABLE_DURATIONCall>()?
                    ._0,
                "slashing disable duration",
            )?,
        })
    }

    /// Fetch one round record.
    pub async fn round(&mut self, round: Round) -> Result<RoundRecord, WatchError> {
        let mut records = self.rounds(&[round]).await?;
        let (_, record) = records.remove(0);
        record
    }

    /// Fetch round records, cache-first. Only the misses go on the wire,
    /// in one batch; executed records are written back into the permanent
    /// tier and never fetched again.
    pub async fn rounds(
        &mut self,
        wanted: &[Round],
    ) -> Result<Vec<(Round, Result<RoundRecord, WatchError>)>, WatchError> {
        let mut slots: Vec<Option<Result<RoundRecord, WatchError>>> = wanted
            .iter()
            .map(|round| self.rounds.get(round).map(Ok))
            .collect();

        let missing: Vec<(usize, Round)> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| (i, wanted[i]))
            .collect();

        if !missing.is_empty() {
            let calls: Vec<BatchCall> = missing
                .iter()
                .map(|(_, round)| {
                    BatchCall::new(
                        self.contracts.proposer,
                        &proposer::getRoundCall {
                            _round: U256::from(*round),
                        },
                        "getRound",
                    )
                })
                .collect();
            let outcomes =
                aggregate(self.eth_node.as_ref(), self.contracts.multicall, &calls)
                    .await?;

            for ((slot, round), outcome) in missing.into_iter().zip(outcomes) {
                let record = outcome.decode::<proposer::getRoundCall>().and_then(
                    |ret| {
                        Ok(RoundRecord {
                            round,
                            vote_count: to_u64(ret.voteCount, "vote count")?,
                            is_executed: ret.executed,
                        })
                    },
                );
                if let Ok(record) = &record {
                    self.rounds.set(round, *record, self.round_ttl);
                }
                slots[slot] = Some(record);
            }
        }

        self.publish_cache_metrics();

        Ok(wanted
            .iter()
            .zip(slots)
            .map(|(round, slot)| {
                let record = slot.unwrap_or(Err(WatchError::CallFailed {
                    index: 0,
                    what: "getRound",
                }));
                (*round, record)
            })
            .collect())
    }

    /// Drop a round from the cache, forcing a refetch next time.
    pub fn invalidate_round(&mut self, round: Round) {
        self.rounds.delete(&round);
    }

    /// Target committees for each round, one batch.
    pub async fn committees(
        &self,
        rounds: &[Round],
    ) -> Result<Vec<Result<Vec<Committee>, WatchError>>, WatchError> {
        let calls: Vec<BatchCall> = rounds
            .iter()
            .map(|round| {
                BatchCall::new(
                    self.contracts.proposer,
                    &proposer::getTargetCommitteesCall {
                        _round: U256::from(*round),
                    },
                    "getTargetCommittees",
                )
            })
            .collect();
        let outcomes =
            aggregate(self.eth_node.as_ref(), self.contracts.multicall, &calls).await?;
        Ok(outcomes
            .into_iter()
            .map(|outcome| {
                outcome
                    .decode::<proposer::getTargetCommitteesCall>()
                    .map(|ret| ret.committees)
            })
            .collect())
    }

    /// Tallied slash actions for each (round, committees) pair, one batch.
    pub async fn slash_actions(
        &self,
        tallies: &[(Round, Vec<Committee>)],
    ) -> Result<Vec<Result<Vec<SlashAction>, WatchError>>, WatchError> {
        let calls: Vec<BatchCall> = tallies
            .iter()
            .map(|(round, committees)| {
                BatchCall::new(
                    self.contracts.proposer,
                    &proposer::getSlashActionsCall {
                        _round: U256::from(*round),
                        _committees: committees.clone(),
                    },
                    "getSlashActions",
                )
            })
            .collect();
        let outcomes =
            aggregate(self.eth_node.as_ref(), self.contracts.multicall, &calls).await?;
        Ok(tallies
            .iter()
            .zip(outcomes)
            .map(|((round, _), outcome)| {
                let ret = outcome.decode::<proposer::getSlashActionsCall>()?;
                if ret.validators.len() != ret.amounts.len() {
                    return Err(WatchError::TallyShape {
                        round: *round,
                        validators: ret.validators.len(),
                        amounts: ret.amounts.len(),
                    });
                }
                Ok(ret
                    .validators
                    .into_iter()
                    .zip(ret.amounts)
                    .map(|(validator, amount)| SlashAction { validator, amount })
                    .collect())
            })
            .collect())
    }

    /// Deterministic payload address for each action list, one batch.
    pub async fn payload_addresses(
        &self,
        action_lists: &[Vec<SlashAction>],
    ) -> Result<Vec<Result<Address, WatchError>>, WatchError> {
        let calls: Vec<BatchCall> = action_lists
            .iter()
            .map(|actions| {
                BatchCall::new(
                    self.contracts.slasher,
                    &slasher::getPayloadAddressCall {
                        _validators: actions.iter().map(|a| a.validator).collect(),
                        _amounts: actions.iter().map(|a| a.amount).collect(),
                    },
                    "getPayloadAddress",
                )
            })
            .collect();
        let outcomes =
            aggregate(self.eth_node.as_ref(), self.contracts.multicall, &calls).await?;
        Ok(outcomes
            .into_iter()
            .map(|outcome| {
                outcome
                    .decode::<slasher::getPayloadAddressCall>()
                    .map(|ret| ret.payload)
            })
            .collect())
    }

    /// Veto status for each payload address, one batch.
    pub async fn vetoed(
        &self,
        payloads: &[Address],
    ) -> Result<Vec<Result<bool, WatchError>>, WatchError> {
        let calls: Vec<BatchCall> = payloads
            .iter()
            .map(|payload| {
                BatchCall::new(
                    self.contracts.slasher,
                    &slasher::vetoedPayloadsCall { _payload: *payload },
                    "vetoedPayloads",
                )
            })
            .collect();
        let outcomes =
            aggregate(self.eth_node.as_ref(), self.contracts.multicall, &calls).await?;
        Ok(outcomes
            .into_iter()
            .map(|outcome| {
                outcome
                    .decode::<slasher::vetoedPayloadsCall>()
                    .map(|ret| ret._0)
            })
            .collect())
    }

    /// Fetch one round's detail through the pipeline.
    pub async fn detail(&self, round: Round) -> Result<RoundDetail, WatchError> {
        let mut details = self.details(&[round]).await?;
        let (_, detail) = details.remove(0);
        detail
    }

    /// The four-stage detail pipeline: committees -> tallies -> payload
    /// addresses (non-empty tallies only) -> veto flags. Each stage is one
    /// batch across all surviving rounds, so N rounds cost four round
    /// trips. A round that fails a stage carries that error in its slot;
    /// the later stages simply proceed without it.
    pub async fn details(
        &self,
        rounds: &[Round],
    ) -> Result<Vec<(Round, Result<RoundDetail, WatchError>)>, WatchError> {
        struct Job {
            slot: usize,
            round: Round,
            committees: Vec<Committee>,
        }

        let mut failures: HashMap<usize, WatchError> = HashMap::new();
        let mut done: HashMap<usize, RoundDetail> = HashMap::new();

        // Stage 1: committees.
        let committee_results = self.committees(rounds).await?;
        let mut jobs: Vec<Job> = Vec::new();
        for (slot, result) in committee_results.into_iter().enumerate() {
            match result {
                Ok(committees) => jobs.push(Job {
                    slot,
                    round: rounds[slot],
                    committees,
                }),
                Err(err) => {
                    failures.insert(slot, err);
                }
            }
        }

        // Stage 2: tallies.
        let tally_input: Vec<(Round, Vec<Committee>)> = jobs
            .iter()
            .map(|job| (job.round, job.committees.clone()))
            .collect();
        let tally_results = self.slash_actions(&tally_input).await?;
        let mut tallied: Vec<(Job, Vec<SlashAction>)> = Vec::new();
        for (job, result) in jobs.into_iter().zip(tally_results) {
            match result {
                Ok(actions) => tallied.push((job, actions)),
                Err(err) => {
                    failures.insert(job.slot, err);
                }
            }
        }

        // Empty tallies skip the remaining stages: there is no payload to
        // identify or veto. The engine drops these rounds from the output.
        let (with_actions, empty): (Vec<_>, Vec<_>) = tallied
            .into_iter()
            .partition(|(_, actions)| !actions.is_empty());
        for (job, actions) in empty {
            done.insert(
                job.slot,
                RoundDetail {
                    committees: job.committees,
                    actions,
                    payload: Address::ZERO,
                    is_vetoed: false,
                },
            );
        }

        // Stage 3: payload addresses for the non-empty tallies.
        let action_lists: Vec<Vec<SlashAction>> = with_actions
            .iter()
            .map(|(_, actions)| actions.clone())
            .collect();
        let payload_results = self.payload_addresses(&action_lists).await?;
        let mut identified: Vec<(Job, Vec<SlashAction>, Address)> = Vec::new();
        for ((job, actions), result) in
            with_actions.into_iter().zip(payload_results)
        {
            match result {
                Ok(payload) => identified.push((job, actions, payload)),
                Err(err) => {
                    failures.insert(job.slot, err);
                }
            }
        }

        // Stage 4: veto flags.
        let payloads: Vec<Address> = identified
            .iter()
            .map(|(_, _, payload)| *payload)
            .collect();
        let veto_results = self.vetoed(&payloads).await?;
        for ((job, actions, payload), result) in
            identified.into_iter().zip(veto_results)
        {
            match result {
                Ok(is_vetoed) => {
                    done.insert(
                        job.slot,
                        RoundDetail {
                            committees: job.committees,
                            actions,
                            payload,
                            is_vetoed,
                        },
                    );
                }
                Err(err) => {
                    failures.insert(job.slot, err);
                }
            }
        }

        Ok(rounds
            .iter()
            .enumerate()
            .map(|(slot, round)| {
                let result = match done.remove(&slot) {
                    Some(detail) => Ok(detail),
                    None => Err(failures.remove(&slot).unwrap_or(
                        WatchError::CallFailed {
                            index: slot,
                            what: "detail pipeline",
                        },
                    )),
                };
                (*round, result)
            })
            .collect())
    }

    fn publish_cache_metrics(&self) {
        let stats = self.rounds.stats();
        let metrics = watcher_metrics();
        set_counter(&metrics.round_cache_hits, stats.hits);
        set_counter(&metrics.round_cache_misses, stats.misses);
        set_counter(&metrics.round_cache_promotions, stats.promotions);
        metrics
            .round_cache_permanent_entries
            .set(i64::try_from(stats.permanent_entries).unwrap_or(i64::MAX));
        metrics
            .round_cache_ttl_entries
            .set(i64::try_from(stats.ttl_entries).unwrap_or(i64::MAX));
    }
}

/// Raise a monotone prometheus counter to an absolute value sourced from
/// the cache's own counters.
pub(crate) fn set_counter(
    counter: &prometheus_client::metrics::counter::Counter,
    value: u64,
) {
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}

/// Fetch the protocol constants in one batched call.
pub async fn load_protocol_parameters<P>(
    eth_node: &P,
    contracts: &ContractAddresses,
) -> Result<ProtocolParameters, WatchError>
where
    P: Middleware<Error = ProviderError>,
{
    let calls = [
        BatchCall::new(contracts.proposer, &proposer::ROUND_SIZECall {}, "ROUND_SIZE"),
        BatchCall::new(
            contracts.proposer,
            &proposer::ROUND_SIZE_IN_EPOCHSCall {},
            "ROUND_SIZE_IN_EPOCHS",
        ),
        BatchCall::new(
            contracts.proposer,
            &proposer::EXECUTION_DELAY_IN_ROUNDSCall {},
            "EXECUTION_DELAY_IN_ROUNDS",
        ),
        BatchCall::new(
            contracts.proposer,
            &proposer::LIFETIME_IN_ROUNDSCall {},
            "LIFETIME_IN_ROUNDS",
        ),
        BatchCall::new(
            contracts.proposer,
            &proposer::SLASH_OFFSET_IN_ROUNDSCall {},
            "SLASH_OFFSET_IN_ROUNDS",
        ),
        BatchCall::new(contracts.proposer, &proposer::QUORUMCall {}, "QUORUM"),
        BatchCall::new(
            contracts.proposer,
            &proposer::COMMITTEE_SIZECall {},
            "COMMITTEE_SIZE",
        ),
        BatchCall::new(
            contracts.rollup,
            &rollup::getSlotDurationCall {},
            "getSlotDuration",
        ),
        BatchCall::new(
            contracts.rollup,
            &rollup::getEpochDurationCall {},
            "getEpochDuration",
        ),
    ];
    let outcomes = aggregate(eth_node, contracts.multicall, &calls).await?;

    Ok(ProtocolParameters {
        round_size: to_u64(
            outcomes[0].decode::<proposer::ROUND_SIZECall>()?._0,
            "round size",
        )?,
        round_size_in_epochs: to_u64(
            outcomes[1].decode::<proposer::ROUND_SIZE_IN_EPOCHSCall>()?._0,
            "round size in epochs",
        )?,
        execution_delay_rounds: to_u64(
            outcomes[2].decode::<proposer::EXECUTION_DELAY_IN_ROUNDSCall>()?._0,
            "execution delay",
        )?,
        lifetime_rounds: to_u64(
            outcomes[3].decode::<proposer::LIFETIME_IN_ROUNDSCall>()?._0,
            "lifetime",
        )?,
        slash_offset_rounds: to_u64(
            outcomes[4].decode::<proposer::SLASH_OFFSET_IN_ROUNDSCall>()?._0,
            "slash offset",
        )?,
        quorum: to_u64(outcomes[5].decode::<proposer::QUORUMCall>()?._0, "quorum")?,
        committee_size: to_u64(
            outcomes[6].decode::<proposer::COMMITTEE_SIZECall>()?._0,
            "committee size",
        )?,
        slot_duration: to_u64(
            outcomes[7].decode::<rollup::getSlotDurationCall>()?._0,
            "slot duration",
        )?,
        epoch_duration: to_u64(
            outcomes[8].decode::<rollup::getEpochDurationCall>()?._0,
            "epoch duration",
        )?,
    })
}
