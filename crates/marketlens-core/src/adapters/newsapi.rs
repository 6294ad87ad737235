use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::circuit_breaker::CircuitStatus;
use crate::client::ProviderClient;
use crate::data_source::{
    check_limit, ClientError, FetchError, LiveOptions, MarketDataSource, Payload, MAX_NEWS_LIMIT,
};
use crate::http_client::{HttpAuth, HttpRequest};
use crate::{NewsArticle, NewsDigest, ProviderId, UtcDateTime, ValidationError};

use super::{rejected, upstream_rejection};

pub(super) const DEFAULT_BASE_URL: &str = "https://newsapi.org";

/// Placeholder NewsAPI substitutes for articles pulled by the publisher.
const REMOVED_MARKER: &str = "[Removed]";

/// News slot backed by NewsAPI `v2/everything`.
#[derive(Debug)]
pub struct NewsApiAdapter {
    client: ProviderClient,
}

impl NewsApiAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }

    async fn fetch_digest(&self, api_key: &str, query: String, limit: usize) -> Result<NewsDigest, ClientError> {
        let page_size = limit.to_string();
        let request = HttpRequest::get(self.client.endpoint("v2/everything"))
            .with_query([
                ("q", query.as_str()),
                ("pageSize", page_size.as_str()),
                ("sortBy", "publishedAt"),
                ("language", "en"),
            ])
            .with_auth(&HttpAuth::header("X-Api-Key", api_key));

        let response: EverythingResponse = self.client.get_json(request).await?;
        normalize_digest(query, limit, response)
    }
}

impl MarketDataSource for NewsApiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::News
    }

    fn fetch<'a>(
        &'a self,
        options: &'a LiveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let query = options.news_query.trim().to_owned();
            if query.is_empty() {
                return Err(rejected(ValidationError::EmptyField { field: "news_query" }));
            }
            let limit = check_limit("news_limit", options.news_limit, MAX_NEWS_LIMIT).map_err(rejected)?;
            let api_key = self.client.require_api_key().map_err(rejected)?;

            let digest = self
                .client
                .call(1, || self.fetch_digest(api_key, query, limit))
                .await?;
            Ok(Payload::News(digest))
        })
    }

    fn circuit_breaker_status(&self) -> CircuitStatus {
        self.client.circuit_breaker_status()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EverythingResponse {
    status: String,
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    total_results: u64,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArticle {
    source: Option<RawSource>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: Option<String>,
}

fn normalize_digest(query: String, limit: usize, response: EverythingResponse) -> Result<NewsDigest, ClientError> {
    if response.status != "ok" {
        let code = response.code.unwrap_or_else(|| String::from("unknown"));
        let message = response.message.unwrap_or_default();
        return Err(upstream_rejection(ProviderId::News, format!("{code}: {message}")));
    }

    let articles = response
        .articles
        .into_iter()
        .filter_map(|raw| {
            let title = raw.title.filter(|title| title != REMOVED_MARKER && !title.trim().is_empty())?;
            let url = raw.url.filter(|url| !url.trim().is_empty())?;
            Some(NewsArticle {
                source: raw
                    .source
                    .and_then(|source| source.name)
                    .unwrap_or_else(|| String::from("unknown")),
                title,
                description: raw.description.filter(|text| text != REMOVED_MARKER),
                url,
                published_at: raw
                    .published_at
                    .as_deref()
                    .and_then(|value| UtcDateTime::parse(value).ok()),
            })
        })
        .take(limit)
        .collect();

    Ok(NewsDigest {
        query,
        total_results: response.total_results,
        articles,
    })
}
