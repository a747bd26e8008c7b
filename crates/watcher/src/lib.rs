//! # Watchtower
//!
//! Background worker that watches a proof-of-stake slashing protocol's
//! on-chain round state machine and surfaces rounds an operator may want
//! to veto before they execute.
//!
//! The crate is layered bottom-up:
//!
//! * [`multicall`] — batches N independent `eth_call`s into one round trip;
//! * [`cache`] — a two-tier cache that pins proven-immutable values forever;
//! * [`reader`] — fetches protocol parameters, chain position and round
//!   data with a small constant number of round trips per poll cycle;
//! * [`engine`] — the round-status state machine and the full-sweep
//!   detection pass;
//! * [`service`] — the poll loop, one worker per monitored network.

#![deny(clippy::cast_possible_truncation)]
#![deny(missing_docs)]
#![deny(warnings)]

pub mod abi;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod multicall;
pub mod ports;
pub mod reader;
pub mod service;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::{
    Config,
    ContractAddresses,
};
pub use error::WatchError;
pub use service::WatcherHandle;
