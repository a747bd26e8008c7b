//! Batched read-only calls: N independent `eth_call`s, one round trip.
//!
//! Calls are packed into a single Multicall3 `aggregate3` invocation with
//! `allowFailure = true` per call, so each succeeds or fails independently
//! and order is preserved 1:1 with the input list. Retry policy belongs to
//! the caller; this layer never retries.

use crate::{
    abi::multicall::{
        aggregate3Call,
        Call3,
    },
    error::WatchError,
    metrics::watcher_metrics,
};
use alloy_primitives::Address;
use alloy_sol_types::SolCall;
use ethers_core::types::{
    transaction::eip2718::TypedTransaction,
    Bytes,
    TransactionRequest,
    H160,
};
use ethers_providers::{
    Middleware,
    ProviderError,
};

/// One read-only call awaiting batching.
#[derive(Clone, Debug)]
pub struct BatchCall {
    /// Contract to call.
    pub target: Address,
    /// Full calldata, selector included.
    pub calldata: Vec<u8>,
    /// Label used in errors and logs.
    pub what: &'static str,
}

impl BatchCall {
    /// Encode a typed contract call against `target`.
    pub fn new<C: SolCall>(target: Address, call: &C, what: &'static str) -> Self {
        Self {
            target,
            calldata: call.abi_encode(),
            what,
        }
    }
}

/// Result of one call inside a batch, still ABI-encoded.
#[derive(Clone, Debug)]
pub struct CallOutcome {
    index: usize,
    what: &'static str,
    success: bool,
    return_data: Vec<u8>,
}

impl CallOutcome {
    /// Whether the inner call succeeded on-chain.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Decode the return data as the return value of `C`.
    pub fn decode<C: SolCall>(&self) -> Result<C::Return, WatchError> {
        if !self.success {
            return Err(WatchError::CallFailed {
                index: self.index,
                what: self.what,
            });
        }
        C::abi_decode_returns(&self.return_data, true).map_err(|source| {
            WatchError::Decode {
                what: self.what,
                source,
            }
        })
    }
}

/// Issue `calls` as one `aggregate3` round trip through `eth_node` and
/// return per-call outcomes in submission order.
pub async fn aggregate<P>(
    eth_node: &P,
    multicall: Address,
    calls: &[BatchCall],
) -> Result<Vec<CallOutcome>, WatchError>
where
    P: Middleware<Error = ProviderError>,
{
    if calls.is_empty() {
        return Ok(Vec::new());
    }

    let request = aggregate3Call {
        calls: calls
            .iter()
            .map(|call| Call3 {
                target: call.target,
                allowFailure: true,
                callData: call.calldata.clone().into(),
            })
            .collect(),
    };

    let tx: TypedTransaction = TransactionRequest::new()
        .to(H160::from_slice(multicall.as_slice()))
        .data(Bytes::from(request.abi_encode()))
        .into();

    watcher_metrics().batch_round_trips.inc();
    let raw = eth_node.call(&tx, None).await?;

    let decoded =
        aggregate3Call::abi_decode_returns(raw.as_ref(), true).map_err(|source| {
            WatchError::Decode {
                what: "aggregate3",
                source,
            }
        })?;

    if decoded.returnData.len() != calls.len() {
        return Err(WatchError::BatchShape {
            sent: calls.len(),
            got: decoded.returnData.len(),
        });
    }

    Ok(decoded
        .returnData
        .into_iter()
        .zip(calls)
        .enumerate()
        .map(|(index, (ret, call))| CallOutcome {
            index,
            what: call.what,
            success: ret.success,
            return_data: ret.returnData.to_vec(),
        })
        .collect())
}
