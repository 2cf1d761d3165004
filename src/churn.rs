//! Rolling-hour churn limiter
//!
//! Sliding window of `(timestamp, weight)` entries. An operation is admitted
//! only if the weight already churned in the last hour plus its own weight
//! stays within `maximum_hourly_churn` percent of the total active weight.
//! Admission reserves the entry; a failed operation releases it.

use std::collections::VecDeque;

use crate::error::{ClientError, Result};

pub const CHURN_PERIOD_SECONDS: u64 = 3_600;

/// Handle for releasing a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChurnReservation {
    id: u64,
}

#[derive(Debug, Clone)]
struct ChurnEntry {
    id: u64,
    timestamp: u64,
    weight: u64,
}

#[derive(Debug, Clone)]
pub struct ChurnTracker {
    maximum_hourly_churn: u8,
    entries: VecDeque<ChurnEntry>,
    next_id: u64,
}

impl ChurnTracker {
    pub fn new(maximum_hourly_churn: u8) -> Result<Self> {
        if maximum_hourly_churn == 0 || maximum_hourly_churn > 100 {
            return Err(ClientError::InvalidInput(format!(
                "maximum_hourly_churn must be between 1 and 100, got {}",
                maximum_hourly_churn
            )));
        }
        Ok(Self {
            maximum_hourly_churn,
            entries: VecDeque::new(),
            next_id: 0,
        })
    }

    fn prune(&mut self, now: u64) {
        while let Some(front) = self.entries.front() {
            if front.timestamp + CHURN_PERIOD_SECONDS <= now {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Weight churned within the hour ending at `now`.
    pub fn used(&mut self, now: u64) -> u64 {
        self.prune(now);
        self.entries.iter().map(|e| e.weight).sum()
    }

    pub fn limit(&self, total_active_weight: u64) -> u64 {
        (total_active_weight as u128 * self.maximum_hourly_churn as u128 / 100) as u64
    }

    /// Check and reserve `weight` in one step.
    ///
    /// With zero total active weight the limiter does not apply.
    pub fn reserve(
        &mut self,
        weight: u64,
        total_active_weight: u64,
        now: u64,
    ) -> Result<ChurnReservation> {
        let used = self.used(now);
        if total_active_weight > 0 {
            let limit = self.limit(total_active_weight);
            if used.saturating_add(weight) > limit {
                return Err(ClientError::ChurnLimitExceeded {
                    requested: weight,
                    used,
                    limit,
                });
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(ChurnEntry {
            id,
            timestamp: now,
            weight,
        });
        Ok(ChurnReservation { id })
    }

    /// Undo a reservation whose operation failed.
    pub fn release(&mut self, reservation: ChurnReservation) {
        self.entries.retain(|e| e.id != reservation.id);
    }
}
