//! Deadline composition across sequential phases.
//!
//! One overall budget is split into per-phase timeouts. A phase gets
//! `max(min(remaining, cap), floor)`: the cap keeps one phase from eating the
//! whole budget, and the floor keeps a slow earlier phase from leaving a
//! later read with a zero timeout. Once the budget is fully spent no timeout
//! is issued at all; the caller gets [`ProbeError::BudgetExhausted`] instead.

use crate::config::BudgetConfig;
use crate::error::{ProbeError, Result};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct DeadlineBudget {
    started_at: Instant,
    total: Duration,
    floor: Duration,
}

impl DeadlineBudget {
    /// Start a budget now
    pub fn new(total: Duration, floor: Duration) -> Self {
        Self::starting_at(Instant::now(), total, floor)
    }

    pub fn starting_at(started_at: Instant, total: Duration, floor: Duration) -> Self {
        Self {
            started_at,
            total,
            floor,
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.total_timeout, config.floor)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// `max(total - elapsed, 0)`
    pub fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.total.saturating_sub(self.elapsed_at(now))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Timeout for the next phase, bounded by `cap` and never below the floor.
    pub fn phase_timeout(&self, cap: Duration) -> Result<Duration> {
        self.phase_timeout_at(cap, Instant::now())
    }

    pub fn phase_timeout_at(&self, cap: Duration, now: Instant) -> Result<Duration> {
        let remaining = self.remaining_at(now);
        if remaining.is_zero() {
            return Err(ProbeError::BudgetExhausted);
        }
        Ok(remaining.min(cap).max(self.floor))
    }

    /// Absolute deadline for the next phase.
    pub fn phase_deadline(&self, cap: Duration) -> Result<Instant> {
        let now = Instant::now();
        Ok(now + self.phase_timeout_at(cap, now)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_cap_bounds_phase_when_budget_is_large() {
        let start = Instant::now();
        let budget = DeadlineBudget::starting_at(start, ms(10_000), ms(250));
        assert_eq!(budget.phase_timeout_at(ms(2_000), start).unwrap(), ms(2_000));
    }

    #[test]
    fn test_remaining_bounds_phase_when_budget_is_short() {
        let start = Instant::now();
        let budget = DeadlineBudget::starting_at(start, ms(10_000), ms(250));
        let later = start + ms(9_000);
        assert_eq!(budget.phase_timeout_at(ms(5_000), later).unwrap(), ms(1_000));
    }

    #[test]
    fn test_floor_applies_when_remaining_is_tiny() {
        let start = Instant::now();
        let budget = DeadlineBudget::starting_at(start, ms(1_000), ms(250));
        let later = start + ms(990);
        assert_eq!(budget.remaining_at(later), ms(10));
        assert_eq!(budget.phase_timeout_at(ms(5_000), later).unwrap(), ms(250));
    }

    #[test]
    fn test_spent_budget_fails_fast() {
        let start = Instant::now();
        let budget = DeadlineBudget::starting_at(start, ms(1_000), ms(250));
        for elapsed in [1_000, 1_001, 60_000] {
            let err = budget
                .phase_timeout_at(ms(5_000), start + ms(elapsed))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BudgetExhausted);
        }
        assert_eq!(budget.remaining_at(start + ms(60_000)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_tracks_wall_clock() {
        let budget = DeadlineBudget::new(ms(500), ms(100));
        tokio::time::advance(ms(200)).await;
        assert_eq!(budget.elapsed(), ms(200));
        assert_eq!(budget.remaining(), ms(300));
        tokio::time::advance(ms(300)).await;
        assert!(budget.is_exhausted());
        assert!(budget.phase_deadline(ms(100)).is_err());
    }
}
