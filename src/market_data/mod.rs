// Market data module entrypoint
pub mod cache;       // two-tier TTL order-book cache with a hot set
pub mod error;       // upstream error + retry classification
pub mod order_book;  // normalized order-book snapshot
pub mod polymarket;  // Gamma + CLOB REST client
pub mod types;       // wire types

pub use error::UpstreamError;
pub use order_book::{OrderBookSnapshot, PriceLevel};
pub use types::RawEvent;

/// The batched order-book endpoint accepts at most this many token ids per call.
pub const MAX_BATCH_BOOKS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct SortOrder {
    pub field: String,
    pub ascending: bool,
}

// One page of the events catalog
#[derive(Debug, Clone, PartialEq)]
pub struct EventsQuery {
    pub limit: u32,
    pub offset: u32,
    pub active_only: bool,
    pub unclosed_only: bool,
    pub order: Option<SortOrder>,
}

impl EventsQuery {
    /// The page the catalog sweep asks for: open events, biggest volume first.
    pub fn catalog_page(limit: u32, offset: u32) -> Self {
        Self {
            limit,
            offset,
            active_only: true,
            unclosed_only: true,
            order: Some(SortOrder { field: "volume".into(), ascending: false }),
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("limit", self.limit.to_string()), ("offset", self.offset.to_string())];
        if self.active_only {
            pairs.push(("active", "true".into()));
        }
        if self.unclosed_only {
            pairs.push(("closed", "false".into()));
        }
        if let Some(order) = &self.order {
            pairs.push(("order", order.field.clone()));
            pairs.push(("ascending", order.ascending.to_string()));
        }
        pairs
    }
}

/// Upstream source of catalog and order-book data. Every call is rate limited upstream,
/// so callers go through `RetryingClient` rather than calling these directly in loops.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_events(&self, query: &EventsQuery) -> Result<Vec<RawEvent>, UpstreamError>;

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBookSnapshot, UpstreamError>;

    /// At most [`MAX_BATCH_BOOKS`] ids per call.
    async fn get_order_books(&self, token_ids: &[String]) -> Result<Vec<OrderBookSnapshot>, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_page_query() {
        let pairs = EventsQuery::catalog_page(100, 200).query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("limit", "100".to_string()),
                ("offset", "200".to_string()),
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("order", "volume".to_string()),
                ("ascending", "false".to_string()),
            ]
        );
    }
}
