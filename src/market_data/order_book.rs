use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use serde::Serialize;

use super::types::{coerce_number, BookLevel, BookResponse};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

// Order book for one token (one side of a market)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBookSnapshot {
    pub token_id: String,
    pub market: Option<String>,
    pub bids: Vec<PriceLevel>, // best (highest) first
    pub asks: Vec<PriceLevel>, // best (lowest) first
    pub hash: Option<String>,
    pub timestamp: Option<String>,
}

impl OrderBookSnapshot {
    pub fn new(token_id: impl Into<String>, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        let mut book = Self {
            token_id: token_id.into(),
            market: None,
            bids,
            asks,
            hash: None,
            timestamp: None,
        };
        book.sort_levels();
        book
    }

    /// Build from a CLOB response. `requested` is used when the response omits `asset_id`.
    pub fn from_response(response: BookResponse, requested: &str) -> Self {
        let mut book = Self {
            token_id: response.asset_id.unwrap_or_else(|| requested.to_string()),
            market: response.market,
            bids: to_levels(&response.bids),
            asks: to_levels(&response.asks),
            hash: response.hash,
            timestamp: response.timestamp,
        };
        book.sort_levels();
        book
    }

    // CLOB returns levels worst-first; keep best at index 0
    fn sort_levels(&mut self) {
        self.bids.sort_by_key(|l| Reverse(OrderedFloat(l.price)));
        self.asks.sort_by_key(|l| OrderedFloat(l.price));
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn bbo(&self) -> (Option<PriceLevel>, Option<PriceLevel>) {
        (self.best_bid(), self.best_ask())
    }

    pub fn mid(&self) -> Option<f64> {
        match self.bbo() {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<f64> {
        match self.bbo() {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

// Zero-size levels carry no liquidity, drop them
fn to_levels(levels: &[BookLevel]) -> Vec<PriceLevel> {
    levels
        .iter()
        .map(|l| PriceLevel {
            price: coerce_number(Some(&l.price)),
            size: coerce_number(Some(&l.size)),
        })
        .filter(|l| l.size > 0.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_response_sorts_and_filters() {
        let response: BookResponse = serde_json::from_value(json!({
            "market": "0xcond",
            "asset_id": "111",
            "bids": [
                {"price": "0.40", "size": "100"},
                {"price": "0.45", "size": "50"},
                {"price": "0.44", "size": "0"}
            ],
            "asks": [
                {"price": "0.60", "size": "10"},
                {"price": "0.55", "size": "20"}
            ],
            "hash": "abc"
        }))
        .unwrap();

        let book = OrderBookSnapshot::from_response(response, "ignored");
        assert_eq!(book.token_id, "111");
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.best_bid(), Some(PriceLevel { price: 0.45, size: 50.0 }));
        assert_eq!(book.best_ask(), Some(PriceLevel { price: 0.55, size: 20.0 }));
        assert!((book.spread().unwrap() - 0.10).abs() < 1e-9);
        assert!((book.mid().unwrap() - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_empty_side_has_no_mid() {
        let book = OrderBookSnapshot::new("t", vec![PriceLevel { price: 0.3, size: 1.0 }], vec![]);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.mid(), None);
        assert_eq!(book.spread(), None);
    }
}
