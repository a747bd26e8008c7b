use crate::{
    Epoch,
    Round,
    Slot,
};
use alloy_primitives::{
    Address,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::ops::RangeInclusive;

/// One epoch's slashing committee.
pub type Committee = Vec<Address>;

/// The on-chain record of a slashing round.
///
/// Identity is the round number. `is_executed` is one-way: once observed
/// `true` the record (and everything derived from it) is frozen forever,
/// which is the predicate the caching layer keys immutability on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number.
    pub round: Round,
    /// Votes accumulated by the round.
    pub vote_count: u64,
    /// Whether the round's slashing payload has been executed.
    pub is_executed: bool,
}

/// A single proposed slashing of one validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashAction {
    /// The validator to be slashed.
    pub validator: Address,
    /// The amount to slash, in wei.
    pub amount: U256,
}

/// The full payload of a round that reached quorum (or executed).
///
/// Never computed for rounds that have not reached quorum. `is_vetoed`
/// flips `false -> true` at most once, by the veto authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDetail {
    /// The committees of the round's target epochs.
    pub committees: Vec<Committee>,
    /// The tallied slash actions.
    pub actions: Vec<SlashAction>,
    /// Deterministic identity of the slashing payload.
    pub payload: Address,
    /// Whether the payload has been vetoed.
    pub is_vetoed: bool,
}

/// Where the chain is right now.
///
/// Always fetched fresh, never cached: staleness of everything else is
/// measured against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPosition {
    /// The slashing round in progress.
    pub current_round: Round,
    /// The L1 slot in progress.
    pub current_slot: Slot,
    /// The L1 epoch in progress.
    pub current_epoch: Epoch,
    /// Whether slashing execution is currently enabled chain-wide.
    pub slashing_enabled: bool,
    /// Unix timestamp until which slashing stays disabled (0 if enabled).
    pub slashing_disabled_until: u64,
    /// How long one disable action lasts, in seconds.
    pub slashing_disable_duration: u64,
}

/// Lifecycle status of a slashing round, as derived by the detection
/// engine. See [`crate::status::round_status`] for the transition rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundStatus {
    /// Voting window open or quorum not yet reached.
    Voting,
    /// Quorum reached, execution delay not yet elapsed.
    QuorumReached,
    /// First round in which the payload is actually actionable.
    InVetoWindow,
    /// Past the veto window, executable until expiry.
    Executable,
    /// Observed executed on-chain. Terminal.
    Executed,
    /// Execution window elapsed without execution.
    Expired,
}

impl RoundStatus {
    /// Whether an operator can still do something about the round.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::InVetoWindow | Self::Executable)
    }
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Voting => "voting",
            Self::QuorumReached => "quorum-reached",
            Self::InVetoWindow => "in-veto-window",
            Self::Executable => "executable",
            Self::Executed => "executed",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Slot deadlines of a not-yet-executed round, with wall-clock distance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTiming {
    /// First slot at which the payload can be executed.
    pub executable_slot: Slot,
    /// First slot at which the payload is expired.
    pub expiry_slot: Slot,
    /// Seconds until `executable_slot` (0 if already reached).
    pub seconds_until_executable: u64,
    /// Seconds until `expiry_slot` (0 if already reached).
    pub seconds_until_expiry: u64,
}

/// Public output of the detection engine for one round.
///
/// Recomputed from scratch every poll cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedSlashing {
    /// The observed round record.
    pub record: RoundRecord,
    /// Derived lifecycle status.
    pub status: RoundStatus,
    /// Payload detail, present per the engine's detail policy.
    pub detail: Option<RoundDetail>,
    /// The epochs whose offences this round votes on. `None` when the
    /// round predates the slash offset.
    pub target_epochs: Option<RangeInclusive<Epoch>>,
    /// Slot deadlines; `None` once the round is executed.
    pub timing: Option<RoundTiming>,
}

impl DetectedSlashing {
    /// Round number this detection is keyed by.
    pub fn round(&self) -> Round {
        self.record.round
    }
}

/// Everything one poll cycle produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSnapshot {
    /// Monotonic cycle counter, starting at 1 for the initial backfill.
    pub cycle: u64,
    /// Unix timestamp at which the sweep completed.
    pub completed_at: u64,
    /// Chain position the sweep was evaluated against.
    pub position: ChainPosition,
    /// All detections, sorted by round descending.
    pub detections: Vec<DetectedSlashing>,
}
