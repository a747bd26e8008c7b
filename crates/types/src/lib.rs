//! Domain types shared by the watchtower crates.
//!
//! Everything in here is pure data and pure arithmetic: no I/O, no async,
//! no caching. The status state machine in [`status`] is a function of its
//! inputs only, which is what makes the detection engine testable without a
//! chain behind it.

#![deny(clippy::arithmetic_side_effects)]
#![deny(clippy::cast_possible_truncation)]
#![deny(missing_docs)]
#![deny(warnings)]

mod params;
mod round;
pub mod status;

pub use params::ProtocolParameters;
pub use round::{
    ChainPosition,
    Committee,
    DetectedSlashing,
    RoundDetail,
    RoundRecord,
    RoundStatus,
    RoundTiming,
    SlashAction,
    SweepSnapshot,
};

/// A slashing round number.
pub type Round = u64;
/// An L1 slot number.
pub type Slot = u64;
/// An L1 epoch number.
pub type Epoch = u64;
