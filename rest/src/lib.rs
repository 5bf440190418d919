mod rate_limit;

use std::sync::Arc;

use anyhow::Context;
use common::{config::Config, util::DATE_FORMAT};
use entity::data::RawDailyBar;
use log::{debug, info};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use stock_symbol::Symbol;
use thiserror::Error;
use time::Date;

pub use rate_limit::RateLimiter;
pub use reqwest::StatusCode;

/// The price feed could not serve a request. Retrying is the caller's
/// business; this client never retries internally.
#[derive(Debug, Error)]
pub enum FeedUnavailable {
    #[error("failed to reach price feed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("price feed rejected the request with status {0}")]
    Rejected(StatusCode),
    #[error("malformed price feed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct PolygonRestApi {
    config: &'static Config,
    client: Client,
    rate_limiter: Arc<RateLimiter>,
}

impl PolygonRestApi {
    pub fn new() -> Self {
        let config = Config::get();

        Self {
            config,
            client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(config.feed.requests_per_minute)),
        }
    }

    /// Constructs a client and probes the market-status endpoint so that bad
    /// credentials surface at startup rather than on the first fetch.
    pub async fn connect() -> anyhow::Result<Self> {
        let me = Self::new();

        let status = me
            .market_status()
            .await
            .context("Failed to fetch market status from price feed")?;
        info!("Connected to price feed, market is {}", status.market);

        Ok(me)
    }

    fn data_endpoint(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{endpoint}", self.config.urls.polygon_api_base))
            .bearer_auth(&self.config.keys.polygon_api_key)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, FeedUnavailable> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedUnavailable::Rejected(status));
        }

        let text = response.text().await?;
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(error) => {
                debug!("{text}");
                Err(FeedUnavailable::Malformed(error))
            }
        }
    }

    pub async fn market_status(&self) -> Result<MarketStatus, FeedUnavailable> {
        self.rate_limiter.throttle_request().await;
        Self::send(self.data_endpoint("/v1/marketstatus/now")).await
    }

    /// Fetches every daily aggregate bar for `ticker` within the inclusive
    /// `[from, to]` date span, following pagination until exhausted. Days
    /// without trades (weekends, holidays) are simply absent from the result.
    pub async fn daily_aggregates(
        &self,
        ticker: Symbol,
        from: Date,
        to: Date,
    ) -> Result<Vec<RawDailyBar>, FeedUnavailable> {
        let from_date = format_date(from);
        let to_date = format_date(to);
        let limit = self.config.feed.page_limit.to_string();

        let mut bars = Vec::new();
        let mut next_url: Option<String> = None;

        loop {
            self.rate_limiter.throttle_request().await;

            let request = match &next_url {
                // next_url is absolute and already carries the query state
                Some(next) => self
                    .client
                    .get(next)
                    .bearer_auth(&self.config.keys.polygon_api_key),
                None => self
                    .data_endpoint(&format!(
                        "/v2/aggs/ticker/{ticker}/range/1/day/{from_date}/{to_date}"
                    ))
                    .query(&[
                        ("adjusted", "true"),
                        ("sort", "asc"),
                        ("limit", limit.as_str()),
                    ]),
            };

            let response: AggregatesResponse = Self::send(request).await?;
            bars.extend(response.results);

            next_url = response.next_url;
            if next_url.is_none() {
                break;
            }
        }

        Ok(bars)
    }
}

impl Default for PolygonRestApi {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct MarketStatus {
    pub market: String,
    #[serde(rename = "serverTime", default)]
    pub server_time: Option<String>,
}

#[derive(Deserialize)]
struct AggregatesResponse {
    // Absent entirely when the span contains no trading days
    #[serde(default)]
    results: Vec<RawDailyBar>,
    #[serde(default)]
    next_url: Option<String>,
}

fn format_date(date: Date) -> String {
    date.format(&*DATE_FORMAT)
        .unwrap_or_else(|_| date.to_string())
}
