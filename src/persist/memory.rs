// In-memory store: tests and `sync-once --dry-run`
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CatalogStore, PersistResult};
use crate::catalog::{CatalogEvent, CatalogMarket};

#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<AHashMap<String, CatalogEvent>>,
    markets: RwLock<AHashMap<String, CatalogMarket>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&self, id: &str) -> Option<CatalogEvent> {
        self.events.read().get(id).cloned()
    }

    pub fn market(&self, id: &str) -> Option<CatalogMarket> {
        self.markets.read().get(id).cloned()
    }

    pub fn markets_for_event(&self, event_id: &str) -> Vec<CatalogMarket> {
        let mut markets: Vec<CatalogMarket> = self
            .markets
            .read()
            .values()
            .filter(|m| m.event_id == event_id)
            .cloned()
            .collect();
        markets.sort_by(|a, b| a.id.cmp(&b.id));
        markets
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn market_count(&self) -> usize {
        self.markets.read().len()
    }

    /// Total upserts served, including overwrites.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn upsert_event(&self, event: &CatalogEvent) -> PersistResult<()> {
        self.events.write().insert(event.id.clone(), event.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn upsert_market(&self, market: &CatalogMarket) -> PersistResult<()> {
        let mut markets = self.markets.write();
        let mut record = market.clone();
        if let Some(existing) = markets.get(&market.id).and_then(|m| m.onchain_market_id) {
            record.onchain_market_id = Some(existing);
        }
        markets.insert(record.id.clone(), record);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::records::onchain_market_id;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: &str, title: &str) -> CatalogEvent {
        CatalogEvent {
            id: id.into(),
            slug: None,
            title: Some(title.into()),
            description: None,
            image: None,
            icon: None,
            start_date: None,
            end_date: None,
            active: true,
            closed: false,
            volume: 1.0,
            volume_24hr: 0.0,
            liquidity: 0.0,
            open_interest: 0.0,
            tag_slugs: vec![],
            tags: vec![],
            raw: json!({"id": id}),
            synced_at: Utc::now(),
        }
    }

    fn market(id: &str, condition_id: &str) -> CatalogMarket {
        CatalogMarket {
            id: id.into(),
            event_id: "e1".into(),
            condition_id: Some(condition_id.into()),
            question: None,
            slug: None,
            outcomes: vec!["Yes".into(), "No".into()],
            outcome_prices: vec!["0.5".into(), "0.5".into()],
            clob_token_ids: vec![],
            active: true,
            closed: false,
            volume: 0.0,
            liquidity: 0.0,
            end_date: None,
            onchain_market_id: Some(onchain_market_id(condition_id)),
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_event_is_idempotent_and_last_write_wins() {
        let store = MemoryStore::new();
        let first = event("e1", "First");
        store.upsert_event(&first).await.unwrap();
        store.upsert_event(&first).await.unwrap();
        assert_eq!(store.event("e1"), Some(first));

        let second = event("e1", "Second");
        store.upsert_event(&second).await.unwrap();
        assert_eq!(store.event("e1"), Some(second));
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn test_stored_onchain_id_is_kept() {
        let store = MemoryStore::new();
        let original = market("m1", "0xaaa");
        store.upsert_market(&original).await.unwrap();

        let mut changed = market("m1", "0xbbb");
        changed.closed = true;
        store.upsert_market(&changed).await.unwrap();

        let stored = store.market("m1").unwrap();
        assert!(stored.closed);
        assert_eq!(stored.condition_id.as_deref(), Some("0xbbb"));
        assert_eq!(stored.onchain_market_id, original.onchain_market_id);
        assert_eq!(store.markets_for_event("e1").len(), 1);
    }
}
