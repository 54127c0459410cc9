pub mod memory;
pub mod postgres;
pub mod types;
pub use types::*;

use async_trait::async_trait;

use crate::catalog::{CatalogEvent, CatalogMarket};

/// Idempotent create-or-replace by external id. Records are never deleted; a second
/// upsert with different fields overwrites them (last write wins, no merge).
///
/// One exception: a market's `onchain_market_id`, once stored, is kept.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn upsert_event(&self, event: &CatalogEvent) -> PersistResult<()>;
    async fn upsert_market(&self, market: &CatalogMarket) -> PersistResult<()>;
}
