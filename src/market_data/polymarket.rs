// Polymarket adapter: Gamma API for the catalog, CLOB API for order books.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::types::BookResponse;
use super::{EventsQuery, MarketDataSource, OrderBookSnapshot, RawEvent, UpstreamError, MAX_BATCH_BOOKS};

pub const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
pub const DEFAULT_CLOB_URL: &str = "https://clob.polymarket.com";

#[derive(Debug, Clone)]
pub struct PolymarketSource {
    http: reqwest::Client,
    gamma_url: String, // "https://gamma-api.polymarket.com"
    clob_url: String,  // "https://clob.polymarket.com"
}

impl PolymarketSource {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        Self::with_endpoints(DEFAULT_GAMMA_URL, DEFAULT_CLOB_URL, timeout)
    }

    pub fn with_endpoints(
        gamma_url: impl Into<String>,
        clob_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self {
            http,
            gamma_url: trim_base(gamma_url.into()),
            clob_url: trim_base(clob_url.into()),
        })
    }

    pub fn gamma_url(&self) -> &str {
        &self.gamma_url
    }

    pub fn clob_url(&self) -> &str {
        &self.clob_url
    }

    // Non-2xx becomes Status so the retry layer can tell 429 from 5xx from 4xx
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UpstreamError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status: status.as_u16(), retry_after, body });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

// Delay-seconds form only; an HTTP-date or a non-finite value leaves the caller's fallback
fn retry_after(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[async_trait::async_trait]
impl MarketDataSource for PolymarketSource {
    #[instrument(level = "debug", skip(self), fields(offset = query.offset, limit = query.limit))]
    async fn get_events(&self, query: &EventsQuery) -> Result<Vec<RawEvent>, UpstreamError> {
        let url = format!("{}/events", self.gamma_url);
        let items: Vec<Value> = self.send_json(self.http.get(&url).query(&query.query_pairs())).await?;
        debug!(count = items.len(), "fetched events page");
        Ok(items.into_iter().map(RawEvent::new).collect())
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_order_book(&self, token_id: &str) -> Result<OrderBookSnapshot, UpstreamError> {
        let url = format!("{}/book", self.clob_url);
        let response: BookResponse = self
            .send_json(self.http.get(&url).query(&[("token_id", token_id)]))
            .await?;
        Ok(OrderBookSnapshot::from_response(response, token_id))
    }

    #[instrument(level = "debug", skip(self, token_ids), fields(count = token_ids.len()))]
    async fn get_order_books(&self, token_ids: &[String]) -> Result<Vec<OrderBookSnapshot>, UpstreamError> {
        if token_ids.is_empty() {
            return Ok(Vec::new());
        }
        if token_ids.len() > MAX_BATCH_BOOKS {
            return Err(UpstreamError::BatchTooLarge(token_ids.len()));
        }

        let url = format!("{}/books", self.clob_url);
        let body: Vec<Value> = token_ids.iter().map(|id| json!({ "token_id": id })).collect();
        let responses: Vec<BookResponse> = self.send_json(self.http.post(&url).json(&body)).await?;

        // /books echoes asset_id; fall back to request order when it doesn't
        Ok(responses
            .into_iter()
            .zip(token_ids.iter())
            .map(|(response, requested)| OrderBookSnapshot::from_response(response, requested))
            .collect())
    }
}
