use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use tracing::warn;

use crate::market_data::types::{coerce_number, GammaEvent, GammaMarket, GammaTag};

pub const DEFAULT_OUTCOMES: [&str; 2] = ["Yes", "No"];
pub const DEFAULT_OUTCOME_PRICES: [&str; 2] = ["0.5", "0.5"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub id: String,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub icon: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    pub volume: f64,
    pub volume_24hr: f64,
    pub liquidity: f64,
    pub open_interest: f64,
    pub tag_slugs: Vec<String>,
    pub tags: Vec<GammaTag>,
    /// Upstream payload verbatim, for fields we don't model yet.
    pub raw: Value,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMarket {
    pub id: String,
    pub event_id: String,
    pub condition_id: Option<String>,
    pub question: Option<String>,
    pub slug: Option<String>,
    pub outcomes: Vec<String>,
    pub outcome_prices: Vec<String>,
    pub clob_token_ids: Vec<String>, // [yes, no]
    pub active: bool,
    pub closed: bool,
    pub volume: f64,
    pub liquidity: f64,
    pub end_date: Option<DateTime<Utc>>,
    pub onchain_market_id: Option<i64>,
    pub synced_at: DateTime<Utc>,
}

impl CatalogMarket {
    pub fn yes_token_id(&self) -> Option<&str> {
        self.clob_token_ids.first().map(String::as_str)
    }

    pub fn no_token_id(&self) -> Option<&str> {
        self.clob_token_ids.get(1).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventBundle {
    pub event: CatalogEvent,
    pub markets: Vec<CatalogMarket>,
    /// Nested markets dropped because they couldn't be decoded.
    pub skipped_markets: usize,
}

pub fn translate_event(gamma: &GammaEvent, payload: &Value, now: DateTime<Utc>) -> EventBundle {
    let end_date = parse_timestamp(gamma.end_date.as_deref());
    let expired = is_expired(end_date, now);

    let event = CatalogEvent {
        id: gamma.id.clone(),
        slug: gamma.slug.clone(),
        title: gamma.title.clone(),
        description: gamma.description.clone(),
        image: gamma.image.clone(),
        icon: gamma.icon.clone(),
        start_date: parse_timestamp(gamma.start_date.as_deref()),
        end_date,
        // expiry wins over whatever upstream still reports
        active: !expired && gamma.active.unwrap_or(false),
        closed: expired || gamma.closed.unwrap_or(false),
        volume: coerce_number(gamma.volume.as_ref()),
        volume_24hr: coerce_number(gamma.volume_24hr.as_ref()),
        liquidity: coerce_number(gamma.liquidity.as_ref()),
        open_interest: coerce_number(gamma.open_interest.as_ref()),
        tag_slugs: gamma.tags.iter().filter_map(|t| t.slug.clone()).collect(),
        tags: gamma.tags.clone(),
        raw: payload.clone(),
        synced_at: now,
    };

    let mut markets = Vec::with_capacity(gamma.markets.len());
    let mut skipped_markets = 0;
    for raw in &gamma.markets {
        match GammaMarket::deserialize(raw) {
            Ok(market) => markets.push(translate_market(&market, &event.id, expired, now)),
            Err(e) => {
                skipped_markets += 1;
                warn!(event_id = %event.id, error = %e, "skipping malformed market");
            }
        }
    }

    EventBundle { event, markets, skipped_markets }
}

pub fn translate_market(
    gamma: &GammaMarket,
    event_id: &str,
    event_expired: bool,
    now: DateTime<Utc>,
) -> CatalogMarket {
    let end_date = parse_timestamp(gamma.end_date.as_deref());
    let expired = event_expired || is_expired(end_date, now);
    let (outcomes, outcome_prices) = parse_outcomes(gamma.outcomes.as_ref(), gamma.outcome_prices.as_ref());
    let condition_id = gamma
        .condition_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    CatalogMarket {
        id: gamma.id.clone(),
        event_id: event_id.to_string(),
        onchain_market_id: condition_id.as_deref().map(onchain_market_id),
        condition_id,
        question: gamma.question.clone(),
        slug: gamma.slug.clone(),
        outcomes,
        outcome_prices,
        clob_token_ids: parse_token_ids(gamma.clob_token_ids.as_ref()),
        active: !expired && gamma.active.unwrap_or(false),
        closed: expired || gamma.closed.unwrap_or(false),
        volume: coerce_number(gamma.volume.as_ref()),
        liquidity: coerce_number(gamma.liquidity.as_ref()),
        end_date,
        synced_at: now,
    }
}

pub fn is_expired(end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(end_date, Some(end) if end < now)
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD` (read as midnight UTC).
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// A list of strings, either a JSON array or a string holding one (Gamma does both).
/// Numbers are accepted and rendered as strings; anything else fails the whole list.
pub fn parse_string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let decoded;
    let list = match value? {
        Value::Array(items) => items,
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s).ok()?;
            decoded.as_array()?
        }
        _ => return None,
    };
    list.iter()
        .map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Outcomes and prices come back parallel or not at all.
pub fn parse_outcomes(outcomes: Option<&Value>, prices: Option<&Value>) -> (Vec<String>, Vec<String>) {
    match (parse_string_list(outcomes), parse_string_list(prices)) {
        (Some(o), Some(p)) if !o.is_empty() && o.len() == p.len() => (o, p),
        _ => (
            DEFAULT_OUTCOMES.iter().map(|s| s.to_string()).collect(),
            DEFAULT_OUTCOME_PRICES.iter().map(|s| s.to_string()).collect(),
        ),
    }
}

pub fn parse_token_ids(value: Option<&Value>) -> Vec<String> {
    parse_string_list(value).unwrap_or_default()
}

/// Keccak-256 of the condition id, first 8 bytes big-endian, sign bit cleared so it
/// fits a signed 64-bit column.
pub fn onchain_market_id(condition_id: &str) -> i64 {
    let digest = Keccak256::digest(condition_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) & (i64::MAX as u64)) as i64
}
