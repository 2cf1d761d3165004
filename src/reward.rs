//! Staking reward calculation
//!
//! Mirrors the example reward calculator deployed next to the staking
//! validator manager: no reward below 80% uptime over the validation period,
//! otherwise a linear annual rate in basis points.

use ethereum_types::U256;

use crate::error::{ClientError, Result};

pub const UPTIME_REWARDS_THRESHOLD_PERCENTAGE: u64 = 80;
pub const SECONDS_IN_YEAR: u64 = 31_536_000;
pub const BIPS_CONVERSION_FACTOR: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardCalculator {
    reward_basis_points: u64,
}

impl RewardCalculator {
    pub fn new(reward_basis_points: u64) -> Self {
        Self {
            reward_basis_points,
        }
    }

    pub fn reward_basis_points(&self) -> u64 {
        self.reward_basis_points
    }

    /// Reward for `stake` staked from `staking_start` to `staking_end` on a
    /// validator that started at `validator_start` and was up for
    /// `uptime_seconds`.
    pub fn calculate_reward(
        &self,
        stake: U256,
        validator_start: u64,
        staking_start: u64,
        staking_end: u64,
        uptime_seconds: u64,
    ) -> Result<U256> {
        if staking_start < validator_start || staking_end < staking_start {
            return Err(ClientError::InvalidInput(format!(
                "invalid reward period: validator start {}, staking {}..{}",
                validator_start, staking_start, staking_end
            )));
        }

        // uptime / period < threshold / 100, without the division
        let validation_period = (staking_end - validator_start) as u128;
        if (uptime_seconds as u128) * 100
            < validation_period * UPTIME_REWARDS_THRESHOLD_PERCENTAGE as u128
        {
            return Ok(U256::zero());
        }

        let staking_period = U256::from(staking_end - staking_start);
        let numerator = stake
            .checked_mul(U256::from(self.reward_basis_points))
            .and_then(|v| v.checked_mul(staking_period))
            .ok_or_else(|| ClientError::InvalidInput("reward computation overflows".to_string()))?;
        Ok(numerator / U256::from(SECONDS_IN_YEAR) / U256::from(BIPS_CONVERSION_FACTOR))
    }
}
