use std::time::Duration;

use crate::ProviderId;

/// Local request budget of one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub quota_window: Duration,
    pub quota_limit: u32,
}

impl ProviderPolicy {
    pub const fn new(provider_id: ProviderId, quota_limit: u32, quota_window: Duration) -> Self {
        Self {
            provider_id,
            quota_window,
            quota_limit,
        }
    }

    /// Free-tier budgets. ExchangeRate-API counts per month, so forex is left
    /// unlimited locally.
    pub const fn default_for(provider_id: ProviderId) -> Option<Self> {
        let minute = Duration::from_secs(60);
        match provider_id {
            ProviderId::Equities => Some(Self::new(provider_id, 5, minute)),
            ProviderId::Crypto => Some(Self::new(provider_id, 30, minute)),
            ProviderId::News => Some(Self::new(provider_id, 100, Duration::from_secs(86_400))),
            ProviderId::Economic => Some(Self::new(provider_id, 120, minute)),
            ProviderId::Quotes => Some(Self::new(provider_id, 60, minute)),
            ProviderId::Forex => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equities_policy_matches_free_tier() {
        let policy = ProviderPolicy::default_for(ProviderId::Equities).expect("equities budget");

        assert_eq!(policy.quota_window, Duration::from_secs(60));
        assert_eq!(policy.quota_limit, 5);
    }

    #[test]
    fn forex_is_unlimited_locally() {
        assert_eq!(ProviderPolicy::default_for(ProviderId::Forex), None);
    }
}
