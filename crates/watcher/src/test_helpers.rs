//! An in-memory chain the watcher can run against.
//!
//! [`MockChain`] implements `Middleware` and answers `eth_call` only; the
//! only traffic it accepts is Multicall3 `aggregate3` batches, which it
//! unpacks and dispatches against [`MockData`] selector by selector. Every
//! accepted batch counts one simulated network round trip.

#![allow(missing_docs)]

use crate::abi::{
    multicall::{
        aggregate3Call,
        CallReturn,
    },
    proposer,
    rollup,
    slasher,
};
use alloy_primitives::{
    keccak256,
    Address,
    U256,
};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use ethers_core::types::{
    transaction::eip2718::TypedTransaction,
    BlockId,
    Bytes,
};
use ethers_providers::{
    JsonRpcClient,
    Middleware,
    ProviderError,
};
use parking_lot::Mutex;
use serde::{
    de::DeserializeOwned,
    Serialize,
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    fmt::Debug,
    sync::Arc,
    time::Duration,
};
use watchtower_types::{
    Committee,
    ProtocolParameters,
    Round,
};

/// Mutable model of the three contracts plus failure injection knobs.
pub struct MockData {
    pub params: ProtocolParameters,
    pub current_round: Round,
    pub current_slot: u64,
    pub current_epoch: u64,
    pub slashing_enabled: bool,
    pub slashing_disabled_until: u64,
    pub slashing_disable_duration: u64,
    /// round -> (vote count, executed). Missing rounds answer (0, false).
    pub rounds: HashMap<Round, (u64, bool)>,
    pub committees: HashMap<Round, Vec<Committee>>,
    /// round -> (validator, amount) pairs.
    pub actions: HashMap<Round, Vec<(Address, U256)>>,
    pub vetoed: HashSet<Address>,
    /// Selectors that answer `success = false` inside a batch.
    pub failing: HashSet<[u8; 4]>,
    /// When set, the whole `eth_call` errors at the transport level.
    pub fail_transport: bool,
    /// When set, every `eth_call` stalls this long before answering.
    pub call_delay: Option<Duration>,
    /// When set, the batch answer omits its last result.
    pub truncate_batch: bool,
    /// Simulated network round trips accepted so far.
    pub eth_calls: u64,
}

impl MockData {
    pub fn new(params: ProtocolParameters) -> Self {
        Self {
            params,
            current_round: 0,
            current_slot: 0,
            current_epoch: 0,
            slashing_enabled: true,
            slashing_disabled_until: 0,
            slashing_disable_duration: 0,
            rounds: HashMap::new(),
            committees: HashMap::new(),
            actions: HashMap::new(),
            vetoed: HashSet::new(),
            failing: HashSet::new(),
            fail_transport: false,
            call_delay: None,
            truncate_batch: false,
            eth_calls: 0,
        }
    }
}

#[derive(Clone)]
pub struct MockChain {
    pub data: Arc<Mutex<MockData>>,
}

impl Debug for MockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChain").finish()
    }
}

impl MockChain {
    pub fn new(params: ProtocolParameters) -> Self {
        Self {
            data: Arc::new(Mutex::new(MockData::new(params))),
        }
    }

    /// Mutate the chain model between sweeps.
    pub fn update<F: FnOnce(&mut MockData)>(&self, f: F) {
        f(&mut self.data.lock())
    }

    /// Read the chain model.
    pub fn snapshot<R>(&self, f: impl FnOnce(&MockData) -> R) -> R {
        f(&self.data.lock())
    }

    pub fn eth_calls(&self) -> u64 {
        self.data.lock().eth_calls
    }

    /// Move the clock to `slot`, deriving round and epoch the way the
    /// chain does.
    pub fn set_slot(&self, slot: u64) {
        let mut data = self.data.lock();
        data.current_slot = slot;
        data.current_round = slot / data.params.round_size;
        let slots_per_epoch = data.params.epoch_duration / data.params.slot_duration;
        data.current_epoch = slot / slots_per_epoch.max(1);
    }

    /// The payload address the mock derives for a given action list,
    /// usable to pre-veto a payload in a test.
    pub fn payload_for(actions: &[(Address, U256)]) -> Address {
        let call = slasher::getPayloadAddressCall {
            _validators: actions.iter().map(|(v, _)| *v).collect(),
            _amounts: actions.iter().map(|(_, a)| *a).collect(),
        };
        let digest = keccak256(call.abi_encode());
        Address::from_slice(&digest[12..])
    }
}

fn answer(data: &MockData, calldata: &[u8]) -> Option<Vec<u8>> {
    let selector: [u8; 4] = calldata.get(..4)?.try_into().ok()?;
    if data.failing.contains(&selector) {
        return None;
    }
    let uint = |v: u64| (U256::from(v),);
    let out = match selector {
        s if s == rollup::getCurrentSlotCall::SELECTOR => {
            rollup::getCurrentSlotCall::abi_encode_returns(&uint(data.current_slot))
        }
        s if s == rollup::getCurrentEpochCall::SELECTOR => {
            rollup::getCurrentEpochCall::abi_encode_returns(&uint(data.current_epoch))
        }
        s if s == rollup::getSlotDurationCall::SELECTOR => {
            rollup::getSlotDurationCall::abi_encode_returns(&uint(
                data.params.slot_duration,
            ))
        }
        s if s == rollup::getEpochDurationCall::SELECTOR => {
            rollup::getEpochDurationCall::abi_encode_returns(&uint(
                data.params.epoch_duration,
            ))
        }
        s if s == proposer::getCurrentRoundCall::SELECTOR => {
            proposer::getCurrentRoundCall::abi_encode_returns(&uint(
                data.current_round,
            ))
        }
        s if s == proposer::ROUND_SIZECall::SELECTOR => {
            proposer::ROUND_SIZECall::abi_encode_returns(&uint(data.params.round_size))
        }
        s if s == proposer::ROUND_SIZE_IN_EPOCHSCall::SELECTOR => {
            proposer::ROUND_SIZE_IN_EPOCHSCall::abi_encode_returns(&uint(
                data.params.round_size_in_epochs,
            ))
        }
        s if s == proposer::EXECUTION_DELAY_IN_ROUNDSCall::SELECTOR => {
            proposer::EXECUTION_DELAY_IN_ROUNDSCall::abi_encode_returns(&uint(
                data.params.execution_delay_rounds,
            ))
        }
        s if s == proposer::LIFETIME_IN_ROUNDSCall::SELECTOR => {
            proposer::LIFETIME_IN_ROUNDSCall::abi_encode_returns(&uint(
                data.params.lifetime_rounds,
            ))
        }
        s if s == proposer::SLASH_OFFSET_IN_ROUNDSCall::SELECTOR => {
            proposer::SLASH_OFFSET_IN_ROUNDSCall::abi_encode_returns(&uint(
                data.params.slash_offset_rounds,
            ))
        }
        s if s == proposer::QUORUMCall::SELECTOR => {
            proposer::QUORUMCall::abi_encode_returns(&uint(data.params.quorum))
        }
        s if s == proposer::COMMITTEE_SIZECall::SELECTOR => {
            proposer::COMMITTEE_SIZECall::abi_encode_returns(&uint(
                data.params.committee_size,
            ))
        }
        s if s == proposer::getRoundCall::SELECTOR => {
            let call = proposer::getRoundCall::abi_decode(calldata, true).ok()?;
            let round = u64::try_from(call._round).ok()?;
            let (votes, executed) =
                data.rounds.get(&round).copied().unwrap_or((0, false));
            proposer::getRoundCall::abi_encode_returns(&(U256::from(votes), executed))
        }
        s if s == proposer::getTargetCommitteesCall::SELECTOR => {
            let call =
                proposer::getTargetCommitteesCall::abi_decode(calldata, true).ok()?;
            let round = u64::try_from(call._round).ok()?;
            let committees = data.committees.get(&round).cloned().unwrap_or_default();
            proposer::getTargetCommitteesCall::abi_encode_returns(&(committees,))
        }
        s if s == proposer::getSlashActionsCall::SELECTOR => {
            let call =
                proposer::getSlashActionsCall::abi_decode(calldata, true).ok()?;
            let round = u64::try_from(call._round).ok()?;
            let actions = data.actions.get(&round).cloned().unwrap_or_default();
            let validators: Vec<Address> = actions.iter().map(|(v, _)| *v).collect();
            let amounts: Vec<U256> = actions.iter().map(|(_, a)| *a).collect();
            proposer::getSlashActionsCall::abi_encode_returns(&(validators, amounts))
        }
        s if s == slasher::isSlashingEnabledCall::SELECTOR => {
            slasher::isSlashingEnabledCall::abi_encode_returns(&(
                data.slashing_enabled,
            ))
        }
        s if s == slasher::slashingDisabledUntilCall::SELECTOR => {
            slasher::slashingDisabledUntilCall::abi_encode_returns(&uint(
                data.slashing_disabled_until,
            ))
        }
        s if s == slasher::SLASHING_DISABLE_DURATIONCall::SELECTOR => {
            slasher::SLASHING_DISABLE_DURATIONCall::abi_encode_returns(&uint(
                data.slashing_disable_duration,
            ))
        }
        s if s == slasher::getPayloadAddressCall::SELECTOR => {
            let payload = Address::from_slice(&keccak256(calldata)[12..]);
            slasher::getPayloadAddressCall::abi_encode_returns(&(payload,))
        }
        s if s == slasher::vetoedPayloadsCall::SELECTOR => {
            let call = slasher::vetoedPayloadsCall::abi_decode(calldata, true).ok()?;
            slasher::vetoedPayloadsCall::abi_encode_returns(&(data
                .vetoed
                .contains(&call._payload),))
        }
        _ => return None,
    };
    Some(out)
}

#[async_trait]
impl Middleware for MockChain {
    type Error = ProviderError;
    type Provider = Self;
    type Inner = Self;

    fn inner(&self) -> &Self::Inner {
        unreachable!("the mock chain has no inner middleware")
    }

    async fn call(
        &self,
        tx: &TypedTransaction,
        _block: Option<BlockId>,
    ) -> Result<Bytes, Self::Error> {
        // The lock must not be held across the stall.
        let delay = self.data.lock().call_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut data = self.data.lock();
        if data.fail_transport {
            return Err(ProviderError::CustomError(
                "mock transport failure".to_string(),
            ));
        }
        data.eth_calls += 1;

        let calldata = tx
            .data()
            .ok_or_else(|| ProviderError::CustomError("call without data".into()))?;
        let batch = aggregate3Call::abi_decode(calldata.as_ref(), true)
            .map_err(|e| ProviderError::CustomError(e.to_string()))?;

        let mut returns: Vec<CallReturn> = batch
            .calls
            .iter()
            .map(|call| match answer(&data, call.callData.as_ref()) {
                Some(ret) => CallReturn {
                    success: true,
                    returnData: ret.into(),
                },
                None => CallReturn {
                    success: false,
                    returnData: alloy_primitives::Bytes::new(),
                },
            })
            .collect();
        if data.truncate_batch {
            returns.pop();
        }

        Ok(aggregate3Call::abi_encode_returns(&(returns,)).into())
    }
}

// The middleware above never delegates to a raw client, but the trait
// requires one.
#[async_trait]
impl JsonRpcClient for MockChain {
    type Error = ProviderError;

    async fn request<T, R>(&self, method: &str, _params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        panic!("request not mocked: {method}")
    }
}
