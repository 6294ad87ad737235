use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::envelope::ProviderFailure;

pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

/// Bounded trail of provider failures across aggregation passes, oldest
/// entries evicted first.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<ProviderFailure>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, failures: impl IntoIterator<Item = ProviderFailure>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for failure in failures {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(failure);
        }
    }

    /// Snapshot, oldest first.
    pub fn recent(&self) -> Vec<ProviderFailure> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FailureKind;
    use crate::ProviderId;

    fn failure(provider: ProviderId) -> ProviderFailure {
        ProviderFailure::new(provider, FailureKind::Timeout, "slow", true)
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = AuditLog::new(2);
        log.record([failure(ProviderId::News), failure(ProviderId::Forex)]);
        log.record([failure(ProviderId::Quotes)]);

        let providers: Vec<ProviderId> = log.recent().into_iter().map(|f| f.provider).collect();
        assert_eq!(providers, vec![ProviderId::Forex, ProviderId::Quotes]);
    }

    #[test]
    fn zero_capacity_keeps_latest_entry() {
        let log = AuditLog::new(0);
        log.record([failure(ProviderId::News), failure(ProviderId::Crypto)]);
        assert_eq!(log.recent().len(), 1);
        assert_eq!(log.capacity(), 1);
    }
}
