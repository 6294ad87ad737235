use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream provider categories, one adapter and one circuit breaker each.
///
/// The declaration order is the slot order of the aggregate envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Equities,
    Crypto,
    Forex,
    News,
    Economic,
    Quotes,
}

impl ProviderId {
    pub const ALL: [Self; 6] = [
        Self::Equities,
        Self::Crypto,
        Self::Forex,
        Self::News,
        Self::Economic,
        Self::Quotes,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equities => "equities",
            Self::Crypto => "crypto",
            Self::Forex => "forex",
            Self::News => "news",
            Self::Economic => "economic",
            Self::Quotes => "quotes",
        }
    }

    /// Stable breaker identity reported to transition observers.
    pub const fn service_name(self) -> &'static str {
        match self {
            Self::Equities => "equities-provider",
            Self::Crypto => "crypto-provider",
            Self::Forex => "forex-provider",
            Self::News => "news-provider",
            Self::Economic => "economic-provider",
            Self::Quotes => "quotes-provider",
        }
    }

    /// Fallback environment variable holding the provider credential.
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::Equities => "MARKETLENS_EQUITIES_API_KEY",
            Self::Crypto => "MARKETLENS_CRYPTO_API_KEY",
            Self::Forex => "MARKETLENS_FOREX_API_KEY",
            Self::News => "MARKETLENS_NEWS_API_KEY",
            Self::Economic => "MARKETLENS_ECONOMIC_API_KEY",
            Self::Quotes => "MARKETLENS_QUOTES_API_KEY",
        }
    }

    /// Cache key of the provider's last good payload.
    pub fn cache_key(self) -> String {
        format!("provider:{}", self.as_str())
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "equities" => Ok(Self::Equities),
            "crypto" => Ok(Self::Crypto),
            "forex" => Ok(Self::Forex),
            "news" => Ok(Self::News),
            "economic" => Ok(Self::Economic),
            "quotes" => Ok(Self::Quotes),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}
