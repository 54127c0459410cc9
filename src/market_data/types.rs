// Source: https://gamma-api.polymarket.com/events and https://clob.polymarket.com/book
// Gamma is loose about types: ids and numerics arrive as strings or numbers, and list
// fields like `outcomes` are JSON-encoded strings. Everything here deserializes leniently
// and the catalog layer does the coercion.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One catalog item exactly as the upstream sent it.
/// Decoding happens per item so one malformed record can't fail a whole page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub payload: Value,
}

impl RawEvent {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    pub fn decode(&self) -> Result<GammaEvent, serde_json::Error> {
        GammaEvent::deserialize(&self.payload)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaEvent {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default, rename = "volume24hr")]
    pub volume_24hr: Option<Value>,
    #[serde(default)]
    pub liquidity: Option<Value>,
    #[serde(default)]
    pub open_interest: Option<Value>,
    #[serde(default, deserialize_with = "de_null_default")]
    pub tags: Vec<GammaTag>,
    // kept raw, decoded one by one
    #[serde(default, deserialize_with = "de_null_default")]
    pub markets: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GammaTag {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub outcomes: Option<Value>,       // "[\"Yes\", \"No\"]"
    #[serde(default)]
    pub outcome_prices: Option<Value>, // "[\"0.62\", \"0.38\"]"
    #[serde(default)]
    pub clob_token_ids: Option<Value>, // "[\"<yes>\", \"<no>\"]"
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default)]
    pub liquidity: Option<Value>,
    #[serde(default)]
    pub end_date: Option<String>,
}

// CLOB /book and /books response
#[derive(Debug, Clone, Deserialize)]
pub struct BookResponse {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default, deserialize_with = "de_null_default")]
    pub bids: Vec<BookLevel>,
    #[serde(default, deserialize_with = "de_null_default")]
    pub asks: Vec<BookLevel>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    pub price: Value, // usually "0.52"
    pub size: Value,  // usually "1500.25"
}

/// Coerce a loose numeric (number, numeric string, anything else) to a finite f64.
/// Falls back to 0 so downstream never sees NaN or infinities.
pub fn coerce_number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_from_value(value).ok_or_else(|| serde::de::Error::custom("expected a string or numeric id"))
}

fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(id_from_value))
}

fn de_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_event_with_numeric_id_and_null_lists() {
        let raw = RawEvent::new(json!({
            "id": 16167,
            "title": "Fed decision in March?",
            "volume": "1234.5",
            "tags": null,
            "markets": null,
            "someNewField": {"nested": true}
        }));
        let event = raw.decode().unwrap();
        assert_eq!(event.id, "16167");
        assert!(event.tags.is_empty());
        assert!(event.markets.is_empty());
        assert_eq!(coerce_number(event.volume.as_ref()), 1234.5);
    }

    #[test]
    fn test_decode_event_without_id_fails() {
        let raw = RawEvent::new(json!({"title": "orphan"}));
        assert!(raw.decode().is_err());
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number(Some(&json!(12.5))), 12.5);
        assert_eq!(coerce_number(Some(&json!(" 7 "))), 7.0);
        assert_eq!(coerce_number(Some(&json!("abc"))), 0.0);
        assert_eq!(coerce_number(Some(&json!("NaN"))), 0.0);
        assert_eq!(coerce_number(Some(&json!("inf"))), 0.0);
        assert_eq!(coerce_number(Some(&json!(null))), 0.0);
        assert_eq!(coerce_number(Some(&json!([1]))), 0.0);
        assert_eq!(coerce_number(None), 0.0);
    }
}
