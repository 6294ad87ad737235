use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::provider_policy::ProviderPolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket request budget for one provider.
///
/// The full quota is available as a burst and refills evenly across the window.
pub struct RateBudget {
    limiter: DirectRateLimiter,
    clock: DefaultClock,
    quota_limit: u32,
    quota_window: Duration,
}

impl Debug for RateBudget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget")
            .field("quota_limit", &self.quota_limit)
            .field("quota_window", &self.quota_window)
            .finish_non_exhaustive()
    }
}

impl RateBudget {
    pub fn new(quota_limit: u32, quota_window: Duration) -> Self {
        Self {
            limiter: RateLimiter::direct(quota_from_window(quota_window, quota_limit)),
            clock: DefaultClock::default(),
            quota_limit,
            quota_window,
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(policy.quota_limit, policy.quota_window)
    }

    /// Takes one request from the budget, or reports how long until one is free.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Takes `cost` requests at once. A cost above the burst size can never fit
    /// and reports a full window.
    pub fn try_acquire_n(&self, cost: u32) -> Result<(), Duration> {
        let Some(cost) = NonZeroU32::new(cost) else {
            return Ok(());
        };
        match self.limiter.check_n(cost) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(not_until)) => Err(not_until.wait_time_from(self.clock.now())),
            Err(_) => Err(self.quota_window),
        }
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_once_burst_is_spent() {
        let budget = RateBudget::new(2, Duration::from_secs(60));

        assert!(budget.try_acquire().is_ok());
        assert!(budget.try_acquire().is_ok());

        let wait = budget.try_acquire().expect_err("third request exceeds budget");
        assert!(wait > Duration::from_secs(20));
        assert!(wait <= Duration::from_secs(30));
    }

    #[test]
    fn batch_cost_spends_several_cells() {
        let budget = RateBudget::new(5, Duration::from_secs(60));

        assert!(budget.try_acquire_n(3).is_ok());
        assert!(budget.try_acquire_n(3).is_err());
        assert!(budget.try_acquire_n(2).is_ok());
        assert_eq!(budget.try_acquire_n(6), Err(Duration::from_secs(60)));
    }

    #[test]
    fn zero_limit_still_admits_one_request() {
        let budget = RateBudget::new(0, Duration::from_secs(60));
        assert!(budget.try_acquire().is_ok());
        assert!(budget.try_acquire().is_err());
    }
}
