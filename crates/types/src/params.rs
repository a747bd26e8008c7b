use serde::{
    Deserialize,
    Serialize,
};

/// Protocol constants governing the slashing round lifecycle.
///
/// Loaded once at startup from the on-chain contracts and never mutated
/// afterwards. Config may carry a copy used as a fallback when the
/// on-chain load fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    /// Number of slots in one slashing round.
    pub round_size: u64,
    /// Number of epochs covered by one slashing round.
    pub round_size_in_epochs: u64,
    /// Rounds that must elapse after voting closes before execution.
    pub execution_delay_rounds: u64,
    /// Rounds after voting closes during which execution remains valid.
    pub lifetime_rounds: u64,
    /// Distance between a round and the target epochs it votes on.
    pub slash_offset_rounds: u64,
    /// Minimum vote count for a round to become executable.
    pub quorum: u64,
    /// Number of committee members per epoch.
    pub committee_size: u64,
    /// Duration of one slot, in seconds.
    pub slot_duration: u64,
    /// Duration of one epoch, in seconds.
    pub epoch_duration: u64,
}

impl ProtocolParameters {
    /// Whether `vote_count` meets the quorum threshold.
    pub fn has_quorum(&self, vote_count: u64) -> bool {
        vote_count >= self.quorum
    }
}
