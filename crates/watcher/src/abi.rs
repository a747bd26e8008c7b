#![allow(missing_docs)]
use alloy_sol_types::sol;

/// Multicall3-compatible batching contract. Only `aggregate3` is used;
/// every inner call is issued with `allowFailure = true` so one reverting
/// call cannot poison the batch.
pub mod multicall {
    super::sol! {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct CallReturn {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (CallReturn[] memory returnData);
    }
}

/// The rollup contract: the chain clock.
pub mod rollup {
    super::sol! {
        function getCurrentSlot() external view returns (uint256);
        function getCurrentEpoch() external view returns (uint256);
        function getSlotDuration() external view returns (uint256);
        function getEpochDuration() external view returns (uint256);
    }
}

/// The slashing proposer contract: rounds, votes and tallies.
pub mod proposer {
    super::sol! {
        function ROUND_SIZE() external view returns (uint256);
        function ROUND_SIZE_IN_EPOCHS() external view returns (uint256);
        function EXECUTION_DELAY_IN_ROUNDS() external view returns (uint256);
        function LIFETIME_IN_ROUNDS() external view returns (uint256);
        function SLASH_OFFSET_IN_ROUNDS() external view returns (uint256);
        function QUORUM() external view returns (uint256);
        function COMMITTEE_SIZE() external view returns (uint256);

        function getCurrentRound() external view returns (uint256);
        function getRound(uint256 _round) external view returns (uint256 voteCount, bool executed);
        function getTargetCommittees(uint256 _round) external view returns (address[][] memory committees);
        function getSlashActions(uint256 _round, address[][] memory _committees) external view returns (address[] memory validators, uint256[] memory amounts);
    }
}

/// The slasher contract: execution toggle, payload identity, veto status.
pub mod slasher {
    super::sol! {
        function isSlashingEnabled() external view returns (bool);
        function slashingDisabledUntil() external view returns (uint256);
        function SLASHING_DISABLE_DURATION() external view returns (uint256);

        function getPayloadAddress(address[] memory _validators, uint256[] memory _amounts) external view returns (address payload);
        function vetoedPayloads(address _payload) external view returns (bool);
    }
}
