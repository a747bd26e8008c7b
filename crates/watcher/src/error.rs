//! Failure taxonomy of the watcher.
//!
//! Per-call failures inside a batch stay attached to the call they belong
//! to; a transport failure fails the whole batch; anything that escapes a
//! poll cycle is caught at the cycle boundary and degrades to "retry next
//! interval". Nothing here is fatal to the host process.

use ethers_providers::ProviderError;

/// Errors produced by the batching, reading and detection layers.
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    /// The single network round trip carrying a batch failed outright.
    #[error("eth transport error: {0}")]
    Transport(#[from] ProviderError),

    /// One call inside an otherwise successful batch reverted or failed.
    #[error("batched call #{index} ({what}) failed on-chain")]
    CallFailed {
        /// Position of the call in the submitted batch.
        index: usize,
        /// What the call was fetching.
        what: &'static str,
    },

    /// A successful call returned bytes that do not decode.
    #[error("abi decode error for {what}: {source}")]
    Decode {
        /// What the call was fetching.
        what: &'static str,
        /// Underlying ABI error.
        source: alloy_sol_types::Error,
    },

    /// The batch contract returned a result list of the wrong length.
    #[error("batch returned {got} results for {sent} calls")]
    BatchShape {
        /// Calls submitted.
        sent: usize,
        /// Results returned.
        got: usize,
    },

    /// An on-chain quantity does not fit the engine's integer domain.
    #[error("on-chain value out of range for {what}")]
    OutOfRange {
        /// Which quantity overflowed.
        what: &'static str,
    },

    /// Tally stages returned lists whose lengths disagree.
    #[error("tally for round {round} returned {validators} validators but {amounts} amounts")]
    TallyShape {
        /// The round whose tally is malformed.
        round: u64,
        /// Length of the validator list.
        validators: usize,
        /// Length of the amount list.
        amounts: usize,
    },

    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
