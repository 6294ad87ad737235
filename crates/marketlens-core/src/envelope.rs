use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::BreakerError;
use crate::data_source::{ClientErrorKind, FetchError, Payload};
use crate::{
    CryptoPrices, EconomicSeries, EquityQuote, ForexRates, NewsDigest, ProviderId, QuoteBatch,
    UtcDateTime,
};

pub const SCHEMA_VERSION: &str = "v1.0.0";

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub meta: AggregateMeta,
    pub status: AggregateStatus,
    pub data: AggregateData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ProviderFailure>,
}

impl AggregateResult {
    /// Builds the envelope; `status` and the provider lists follow from `data`.
    pub fn new(
        request_id: impl Into<String>,
        latency_ms: u64,
        data: AggregateData,
        errors: Vec<ProviderFailure>,
    ) -> Self {
        let succeeded = data.filled();
        let failed = ProviderId::ALL
            .into_iter()
            .filter(|provider| !succeeded.contains(provider))
            .collect::<Vec<_>>();
        let status = AggregateStatus::from_counts(succeeded.len(), ProviderId::ALL.len());

        Self {
            meta: AggregateMeta {
                request_id: request_id.into(),
                schema_version: String::from(SCHEMA_VERSION),
                generated_at: UtcDateTime::now(),
                latency_ms,
                succeeded,
                failed,
                from_fragments: false,
                warnings: Vec::new(),
            },
            status,
            data,
            errors,
        }
    }
}

/// Aggregate health: `error` only if every slot failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Ok,
    Partial,
    Error,
}

impl AggregateStatus {
    pub const fn from_counts(succeeded: usize, total: usize) -> Self {
        if succeeded == 0 {
            Self::Error
        } else if succeeded >= total {
            Self::Ok
        } else {
            Self::Partial
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

impl Display for AggregateStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to every aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMeta {
    pub request_id: String,
    pub schema_version: String,
    pub generated_at: UtcDateTime,
    pub latency_ms: u64,
    pub succeeded: Vec<ProviderId>,
    pub failed: Vec<ProviderId>,
    /// Rebuilt from per-provider cache fragments rather than one live pass.
    #[serde(default)]
    pub from_fragments: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AggregateMeta {
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// One slot per provider category. An absent slot serializes as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateData {
    pub equities: Option<EquityQuote>,
    pub crypto: Option<CryptoPrices>,
    pub forex: Option<ForexRates>,
    pub news: Option<NewsDigest>,
    pub economic: Option<EconomicSeries>,
    pub quotes: Option<QuoteBatch>,
}

impl AggregateData {
    pub fn insert(&mut self, payload: Payload) {
        match payload {
            Payload::Equities(value) => self.equities = Some(value),
            Payload::Crypto(value) => self.crypto = Some(value),
            Payload::Forex(value) => self.forex = Some(value),
            Payload::News(value) => self.news = Some(value),
            Payload::Economic(value) => self.economic = Some(value),
            Payload::Quotes(value) => self.quotes = Some(value),
        }
    }

    pub const fn is_filled(&self, provider: ProviderId) -> bool {
        match provider {
            ProviderId::Equities => self.equities.is_some(),
            ProviderId::Crypto => self.crypto.is_some(),
            ProviderId::Forex => self.forex.is_some(),
            ProviderId::News => self.news.is_some(),
            ProviderId::Economic => self.economic.is_some(),
            ProviderId::Quotes => self.quotes.is_some(),
        }
    }

    /// Filled slots in slot order.
    pub fn filled(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|provider| self.is_filled(*provider))
            .collect()
    }
}

/// Why a slot is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Network,
    MalformedResponse,
    #[serde(rename = "upstream_4xx")]
    Upstream4xx,
    #[serde(rename = "upstream_5xx")]
    Upstream5xx,
    InvalidRequest,
    RateLimited,
    CircuitOpen,
    DeadlineExceeded,
}

impl FailureKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Timeout => ClientErrorKind::Timeout.code(),
            Self::Network => ClientErrorKind::Network.code(),
            Self::MalformedResponse => ClientErrorKind::MalformedResponse.code(),
            Self::Upstream4xx => ClientErrorKind::Upstream4xx.code(),
            Self::Upstream5xx => ClientErrorKind::Upstream5xx.code(),
            Self::InvalidRequest => ClientErrorKind::InvalidRequest.code(),
            Self::RateLimited => ClientErrorKind::RateLimited.code(),
            Self::CircuitOpen => "circuit.open",
            Self::DeadlineExceeded => "aggregate.deadline_exceeded",
        }
    }
}

impl From<ClientErrorKind> for FailureKind {
    fn from(kind: ClientErrorKind) -> Self {
        match kind {
            ClientErrorKind::Timeout => Self::Timeout,
            ClientErrorKind::Network => Self::Network,
            ClientErrorKind::MalformedResponse => Self::MalformedResponse,
            ClientErrorKind::Upstream4xx => Self::Upstream4xx,
            ClientErrorKind::Upstream5xx => Self::Upstream5xx,
            ClientErrorKind::InvalidRequest => Self::InvalidRequest,
            ClientErrorKind::RateLimited => Self::RateLimited,
        }
    }
}

/// Audit record of one provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Rejected before any request reached the provider.
    #[serde(default)]
    pub local: bool,
    pub at: UtcDateTime,
}

impl ProviderFailure {
    pub fn new(provider: ProviderId, kind: FailureKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            provider,
            kind,
            code: String::from(kind.code()),
            message: message.into(),
            retryable,
            local: false,
            at: UtcDateTime::now(),
        }
    }

    pub fn from_fetch_error(provider: ProviderId, error: &FetchError) -> Self {
        match error {
            BreakerError::Open(open) => Self {
                local: true,
                ..Self::new(provider, FailureKind::CircuitOpen, open.to_string(), true)
            },
            BreakerError::Inner(client) => Self {
                local: client.kind().is_local(),
                ..Self::new(provider, client.kind().into(), client.message(), client.retryable())
            },
        }
    }

    pub fn deadline_exceeded(provider: ProviderId, deadline: Duration) -> Self {
        Self::new(
            provider,
            FailureKind::DeadlineExceeded,
            format!("{provider} did not settle within {}ms", deadline.as_millis()),
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitOpenError;
    use crate::data_source::ClientError;

    #[test]
    fn status_follows_filled_slot_count() {
        assert_eq!(AggregateStatus::from_counts(6, 6), AggregateStatus::Ok);
        assert_eq!(AggregateStatus::from_counts(4, 6), AggregateStatus::Partial);
        assert_eq!(AggregateStatus::from_counts(0, 6), AggregateStatus::Error);
    }

    #[test]
    fn empty_aggregate_lists_every_provider_as_failed() {
        let result = AggregateResult::new("request-1", 3, AggregateData::default(), Vec::new());

        assert_eq!(result.status, AggregateStatus::Error);
        assert!(result.meta.succeeded.is_empty());
        assert_eq!(result.meta.failed, ProviderId::ALL.to_vec());
        assert_eq!(result.meta.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn absent_slots_serialize_as_null() {
        let mut data = AggregateData::default();
        data.insert(Payload::Quotes(QuoteBatch { quotes: Vec::new() }));
        let result = AggregateResult::new("request-2", 1, data, Vec::new());

        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["status"], "partial");
        assert!(json["data"]["equities"].is_null());
        assert!(json["data"]["quotes"].is_object());
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn failures_carry_structured_codes() {
        let open: FetchError = BreakerError::Open(CircuitOpenError {
            service: String::from("news-provider"),
            retry_in: Duration::from_secs(12),
        });
        let failure = ProviderFailure::from_fetch_error(ProviderId::News, &open);
        assert_eq!(failure.kind, FailureKind::CircuitOpen);
        assert_eq!(failure.code, "circuit.open");
        assert!(failure.local);

        let inner: FetchError = BreakerError::Inner(ClientError::upstream(503, "busy"));
        let failure = ProviderFailure::from_fetch_error(ProviderId::Forex, &inner);
        assert_eq!(failure.kind, FailureKind::Upstream5xx);
        assert!(failure.retryable);
        assert_eq!(failure.message, "busy");
        assert!(!failure.local);
    }

    #[test]
    fn local_rejections_are_flagged() {
        let limited: FetchError = BreakerError::Inner(ClientError::rate_limited("budget spent"));
        let failure = ProviderFailure::from_fetch_error(ProviderId::Quotes, &limited);
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert!(failure.local);

        let timeout = ProviderFailure::deadline_exceeded(ProviderId::Quotes, Duration::from_secs(1));
        assert!(!timeout.local);
    }
}
