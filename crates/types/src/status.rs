//! The round-status state machine and the window arithmetic around it.
//!
//! Statuses only ever move forward:
//! `voting -> quorum-reached -> in-veto-window/executable -> executed`, or
//! `voting/quorum-reached -> expired`. The slot cross-check against
//! [`executable_slot`] can only delay a promotion that round arithmetic
//! alone would grant, never trigger one early; this guards against
//! round/slot drift between the two clocks.

use crate::{
    ChainPosition,
    Epoch,
    ProtocolParameters,
    Round,
    RoundRecord,
    RoundStatus,
    RoundTiming,
    Slot,
};
use std::ops::RangeInclusive;

/// First slot at which round `round` can be executed.
pub fn executable_slot(round: Round, params: &ProtocolParameters) -> Slot {
    round
        .saturating_add(1)
        .saturating_add(params.execution_delay_rounds)
        .saturating_mul(params.round_size)
}

/// First slot at which round `round` is expired.
pub fn expiry_slot(round: Round, params: &ProtocolParameters) -> Slot {
    round
        .saturating_add(1)
        .saturating_add(params.lifetime_rounds)
        .saturating_mul(params.round_size)
}

/// Derive the lifecycle status of a round from the observed record, the
/// current chain position and the protocol constants. Pure: no hidden
/// state.
pub fn round_status(
    record: &RoundRecord,
    position: &ChainPosition,
    params: &ProtocolParameters,
) -> RoundStatus {
    // The on-chain executed flag is terminal and beats every other rule.
    if record.is_executed {
        return RoundStatus::Executed;
    }

    let vote_status = if params.has_quorum(record.vote_count) {
        RoundStatus::QuorumReached
    } else {
        RoundStatus::Voting
    };

    let Some(rounds_since_end) = position.current_round.checked_sub(record.round) else {
        // Round is ahead of the observed chain position; treat as still voting.
        return vote_status;
    };

    if rounds_since_end > params.lifetime_rounds {
        return RoundStatus::Expired;
    }

    let executable = executable_slot(record.round, params);
    if rounds_since_end > params.execution_delay_rounds {
        if position.current_slot >= executable {
            RoundStatus::Executable
        } else {
            vote_status
        }
    } else if rounds_since_end == params.execution_delay_rounds {
        if position.current_slot >= executable {
            RoundStatus::InVetoWindow
        } else {
            vote_status
        }
    } else {
        vote_status
    }
}

/// The epochs whose offences round `round` votes on: a span of
/// `round_size_in_epochs` consecutive epochs starting at
/// `(round - slash_offset_rounds) * round_size_in_epochs`. `None` when the
/// round predates the offset, or the span is empty.
pub fn target_epochs(
    round: Round,
    params: &ProtocolParameters,
) -> Option<RangeInclusive<Epoch>> {
    let target_round = round.checked_sub(params.slash_offset_rounds)?;
    let start = target_round.saturating_mul(params.round_size_in_epochs);
    let end = start.saturating_add(params.round_size_in_epochs.checked_sub(1)?);
    Some(start..=end)
}

/// Seconds until `target_slot`, measured from `current_slot`. Zero once
/// the target has been reached.
pub fn seconds_until(target_slot: Slot, current_slot: Slot, params: &ProtocolParameters) -> u64 {
    target_slot
        .saturating_sub(current_slot)
        .saturating_mul(params.slot_duration)
}

/// Slot deadlines of a not-yet-executed round.
pub fn timing(
    round: Round,
    position: &ChainPosition,
    params: &ProtocolParameters,
) -> RoundTiming {
    let executable = executable_slot(round, params);
    let expiry = expiry_slot(round, params);
    RoundTiming {
        executable_slot: executable,
        expiry_slot: expiry,
        seconds_until_executable: seconds_until(executable, position.current_slot, params),
        seconds_until_expiry: seconds_until(expiry, position.current_slot, params),
    }
}

/// Whether votes can still accumulate for round `round`.
///
/// Votes target offences `slash_offset_rounds` back, so a round stays
/// votable while it is within the offset horizon of the current round.
/// With a zero offset only the current round is open.
pub fn voting_window_open(
    round: Round,
    current_round: Round,
    params: &ProtocolParameters,
) -> bool {
    current_round.saturating_sub(round) < params.slash_offset_rounds.max(1)
}

/// Rounds a sweep must examine: the early-warning zone
/// `[current_round - execution_delay_rounds + 1, current_round]` joined
/// with the active execution zone
/// `[current_round - lifetime_rounds, current_round - execution_delay_rounds]`,
/// clipped at round 0 and deduplicated, ascending.
pub fn observation_window(current_round: Round, params: &ProtocolParameters) -> Vec<Round> {
    let mut rounds = std::collections::BTreeSet::new();

    let early_lo = current_round
        .saturating_add(1)
        .saturating_sub(params.execution_delay_rounds);
    rounds.extend(early_lo..=current_round);

    let active_lo = current_round.saturating_sub(params.lifetime_rounds);
    let active_hi = current_round.saturating_sub(params.execution_delay_rounds);
    if active_lo <= active_hi {
        rounds.extend(active_lo..=active_hi);
    }

    rounds.into_iter().collect()
}

/// The bounded look-back window preceding the active execution zone,
/// scanned for already-executed rounds: `depth` rounds ending just before
/// `current_round - lifetime_rounds`, clipped at round 0, ascending.
pub fn history_window(
    current_round: Round,
    params: &ProtocolParameters,
    depth: u64,
) -> Vec<Round> {
    let Some(end) = current_round
        .saturating_sub(params.lifetime_rounds)
        .checked_sub(1)
    else {
        return Vec::new();
    };
    let start = end.saturating_sub(depth.saturating_sub(1));
    if depth == 0 {
        return Vec::new();
    }
    (start..=end).collect()
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use test_case::test_case;

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

    fn position(current_round: Round, current_slot: Slot) -> ChainPosition {
        ChainPosition {
            current_round,
            current_slot,
            current_epoch: 0,
            slashing_enabled: true,
            slashing_disabled_until: 0,
            slashing_disable_duration: 0,
        }
    }

    fn record(round: Round, vote_count: u64, is_executed: bool) -> RoundRecord {
        RoundRecord {
            round,
            vote_count,
            is_executed,
        }
    }

    // Round 5, delay 1, round size 4: executable from slot (5+1+1)*4 = 28.
    #[test_case(record(5, 6, false), position(6, 28) => RoundStatus::InVetoWindow; "veto window opens exactly at the executable slot")]
    #[test_case(record(5, 6, false), position(6, 27) => RoundStatus::QuorumReached; "slot lag holds a quorum round back")]
    #[test_case(record(5, 2, false), position(6, 27) => RoundStatus::Voting; "slot lag holds a no-quorum round back")]
    #[test_case(record(5, 2, false), position(6, 28) => RoundStatus::InVetoWindow; "veto window does not require quorum once delay elapsed")]
    #[test_case(record(5, 6, false), position(7, 32) => RoundStatus::Executable; "past the veto window the round is executable")]
    #[test_case(record(5, 6, false), position(7, 27) => RoundStatus::QuorumReached; "executable promotion also waits for the slot")]
    #[test_case(record(5, 6, false), position(8, 36) => RoundStatus::Expired; "lifetime elapsed")]
    #[test_case(record(5, 0, false), position(8, 36) => RoundStatus::Expired; "expiry ignores vote count")]
    #[test_case(record(5, 6, true), position(8, 36) => RoundStatus::Executed; "executed beats expiry")]
    #[test_case(record(5, 0, true), position(5, 20) => RoundStatus::Executed; "executed beats everything")]
    #[test_case(record(5, 6, false), position(5, 23) => RoundStatus::QuorumReached; "current round with quorum")]
    #[test_case(record(5, 5, false), position(5, 23) => RoundStatus::Voting; "one vote short of quorum")]
    #[test_case(record(6, 6, false), position(5, 23) => RoundStatus::QuorumReached; "round ahead of chain position falls back to votes")]
    fn status(record: RoundRecord, position: ChainPosition) -> RoundStatus {
        round_status(&record, &position, &params())
    }

    #[test]
    fn status_never_reverses_across_a_round_lifetime() {
        let p = params();
        let rec = record(5, 6, false);
        let rank = |s: RoundStatus| match s {
            RoundStatus::Voting => 0,
            RoundStatus::QuorumReached => 1,
            RoundStatus::InVetoWindow => 2,
            RoundStatus::Executable => 3,
            RoundStatus::Executed | RoundStatus::Expired => 4,
        };
        let mut last = 0;
        // Walk the chain forward slot by slot; the status rank must be
        // monotone non-decreasing.
        for slot in 20..=40 {
            let pos = position(slot / p.round_size, slot);
            let got = rank(round_status(&rec, &pos, &p));
            assert!(got >= last, "status reversed at slot {slot}");
            last = got;
        }
    }

    #[test]
    fn target_epochs_of_round_ten() {
        // Offset 2, four epochs per round: target round 8, epochs 32..=35.
        assert_eq!(target_epochs(10, &params()), Some(32..=35));
    }

    #[test]
    fn target_epochs_before_offset_are_none() {
        assert_eq!(target_epochs(1, &params()), None);
        assert_eq!(target_epochs(2, &params()), Some(0..=3));
    }

    #[test]
    fn timing_counts_down_and_clamps_at_zero() {
        let p = params();
        let t = timing(5, &position(6, 26), &p);
        assert_eq!(t.executable_slot, 28);
        assert_eq!(t.expiry_slot, 32);
        assert_eq!(t.seconds_until_executable, 2 * 12);
        assert_eq!(t.seconds_until_expiry, 6 * 12);

        let t = timing(5, &position(8, 33), &p);
        assert_eq!(t.seconds_until_executable, 0);
        assert_eq!(t.seconds_until_expiry, 0);
    }

    #[test_case(10, 10 => true; "current round is open")]
    #[test_case(9, 10 => true; "one behind is still within the offset horizon")]
    #[test_case(8, 10 => false; "offset rounds behind is closed")]
    #[test_case(0, 10 => false; "ancient round is closed")]
    fn voting_window(round: Round, current_round: Round) -> bool {
        voting_window_open(round, current_round, &params())
    }

    #[test]
    fn voting_window_with_zero_offset_only_covers_the_current_round() {
        let mut p = params();
        p.slash_offset_rounds = 0;
        assert!(voting_window_open(10, 10, &p));
        assert!(!voting_window_open(9, 10, &p));
    }

    #[test_case(10 => vec![8, 9, 10]; "delay 1 lifetime 2 spans three rounds")]
    #[test_case(1 => vec![0, 1]; "clipped at round zero")]
    #[test_case(0 => vec![0]; "chain start")]
    fn window(current_round: Round) -> Vec<Round> {
        observation_window(current_round, &params())
    }

    #[test]
    fn window_zones_join_without_gap_or_duplicates() {
        let mut p = params();
        p.execution_delay_rounds = 2;
        p.lifetime_rounds = 5;
        // Early-warning zone [9, 10], active zone [5, 8].
        assert_eq!(observation_window(10, &p), vec![5, 6, 7, 8, 9, 10]);
    }

    #[test_case(10, 3 => vec![5, 6, 7]; "three rounds before the active zone")]
    #[test_case(10, 0 => Vec::<Round>::new(); "zero depth scans nothing")]
    #[test_case(2, 5 => Vec::<Round>::new(); "no history before chain start")]
    #[test_case(3, 5 => vec![0]; "clipped at round zero")]
    fn history(current_round: Round, depth: u64) -> Vec<Round> {
        history_window(current_round, &params(), depth)
    }
}
