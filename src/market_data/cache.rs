// Order-book cache: hot/cold TTL, stale fallback on failed refresh
use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{MarketDataSource, OrderBookSnapshot, UpstreamError, MAX_BATCH_BOOKS};
use crate::retry::RetryingClient;
use crate::tasks::{PeriodicTask, TaskEvent, TaskOutcome};

pub const HOT_TTL: Duration = Duration::from_secs(30);
pub const COLD_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheTtls {
    pub hot: Duration,
    pub cold: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self { hot: HOT_TTL, cold: COLD_TTL }
    }
}

impl CacheTtls {
    /// Entries older than this are dropped by `cleanup`, hot or not.
    pub fn eviction_age(&self) -> Duration {
        self.cold * 2
    }
}

#[derive(Debug, Clone)]
pub struct CachedOrderBook {
    pub book: Arc<OrderBookSnapshot>,
    pub fetched_at: Instant,
}

impl CachedOrderBook {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

#[derive(Debug, Clone, Error)]
pub enum OrderBookError {
    #[error("order book fetch failed for {token_id}: {source}")]
    Fetch {
        token_id: String,
        #[source]
        source: Arc<UpstreamError>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: usize,
}

type SharedFetch = Shared<BoxFuture<'static, Result<CachedOrderBook, Arc<UpstreamError>>>>;

pub struct OrderBookCache {
    source: Arc<dyn MarketDataSource>,
    retry: RetryingClient,
    ttls: CacheTtls,
    refresh_concurrency: usize,
    entries: Arc<RwLock<AHashMap<String, CachedOrderBook>>>,
    hot: Mutex<AHashSet<String>>,
    in_flight: Arc<Mutex<AHashMap<String, SharedFetch>>>,
}

impl OrderBookCache {
    pub fn new(source: Arc<dyn MarketDataSource>, retry: RetryingClient) -> Self {
        Self::with_ttls(source, retry, CacheTtls::default())
    }

    pub fn with_ttls(source: Arc<dyn MarketDataSource>, retry: RetryingClient, ttls: CacheTtls) -> Self {
        Self {
            source,
            retry,
            ttls,
            refresh_concurrency: 8,
            entries: Arc::new(RwLock::new(AHashMap::new())),
            hot: Mutex::new(AHashSet::new()),
            in_flight: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    pub fn with_refresh_concurrency(mut self, concurrency: usize) -> Self {
        self.refresh_concurrency = concurrency.max(1);
        self
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    pub fn mark_hot(&self, token_id: &str) {
        self.hot.lock().insert(token_id.to_string());
    }

    pub fn mark_cold(&self, token_id: &str) {
        self.hot.lock().remove(token_id);
    }

    pub fn is_hot(&self, token_id: &str) -> bool {
        self.hot.lock().contains(token_id)
    }

    pub fn hot_len(&self) -> usize {
        self.hot.lock().len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cached entry without touching the network, fresh or not.
    pub fn peek(&self, token_id: &str) -> Option<CachedOrderBook> {
        self.entries.read().get(token_id).cloned()
    }

    fn ttl_for(&self, token_id: &str) -> Duration {
        if self.is_hot(token_id) {
            self.ttls.hot
        } else {
            self.ttls.cold
        }
    }

    pub async fn get_order_book(&self, token_id: &str) -> Result<Arc<OrderBookSnapshot>, OrderBookError> {
        let ttl = self.ttl_for(token_id);
        let previous = self.peek(token_id);

        if let Some(entry) = &previous {
            if entry.age() < ttl {
                metrics::counter!("polysync_orderbook_cache_hits_total").increment(1);
                return Ok(Arc::clone(&entry.book));
            }
        }
        metrics::counter!("polysync_orderbook_cache_misses_total").increment(1);

        match self.fetch_shared(token_id).await {
            Ok(entry) => Ok(entry.book),
            Err(source) => match previous {
                Some(stale) => {
                    metrics::counter!("polysync_orderbook_stale_served_total").increment(1);
                    warn!(
                        token_id,
                        age_ms = stale.age().as_millis() as u64,
                        error = %source,
                        "refresh failed, serving stale order book"
                    );
                    Ok(stale.book)
                }
                None => Err(OrderBookError::Fetch { token_id: token_id.to_string(), source }),
            },
        }
    }

    // Join the fetch already running for this key, or start one. The fetch itself
    // stores the result and clears its marker, so that happens once however many
    // callers are waiting.
    fn fetch_shared(&self, token_id: &str) -> SharedFetch {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(token_id) {
            debug!(token_id, "joining in-flight order book fetch");
            return existing.clone();
        }

        let source = Arc::clone(&self.source);
        let retry = self.retry.clone();
        let entries = Arc::clone(&self.entries);
        let markers = Arc::clone(&self.in_flight);
        let key = token_id.to_string();

        let fetch = async move {
            let result = retry
                .execute("get_order_book", || source.get_order_book(&key))
                .await;
            let outcome = match result {
                Ok(book) => {
                    let entry = CachedOrderBook { book: Arc::new(book), fetched_at: Instant::now() };
                    entries.write().insert(key.clone(), entry.clone());
                    Ok(entry)
                }
                Err(e) => Err(Arc::new(e)),
            };
            markers.lock().remove(&key);
            outcome
        }
        .boxed()
        .shared();

        in_flight.insert(token_id.to_string(), fetch.clone());
        fetch
    }

    /// Re-reads every hot key. One failing key never stops the others.
    #[instrument(level = "debug", skip(self))]
    pub async fn refresh_hot_markets(&self) -> RefreshReport {
        let keys: Vec<String> = self.hot.lock().iter().cloned().collect();
        if keys.is_empty() {
            return RefreshReport::default();
        }

        let results: Vec<(String, Result<Arc<OrderBookSnapshot>, OrderBookError>)> =
            futures::stream::iter(keys)
                .map(|key| async move {
                    let result = self.get_order_book(&key).await;
                    (key, result)
                })
                .buffer_unordered(self.refresh_concurrency)
                .collect()
                .await;

        let mut report = RefreshReport::default();
        for (key, result) in results {
            match result {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(token_id = %key, error = %e, "hot market refresh failed");
                }
            }
        }
        debug!(refreshed = report.refreshed, failed = report.failed, "hot market refresh done");
        report
    }

    /// Drops entries older than twice the cold TTL. Returns how many went.
    pub fn cleanup(&self) -> usize {
        let max_age = self.ttls.eviction_age();
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| entry.age() <= max_age);
            before - entries.len()
        };
        metrics::gauge!("polysync_orderbook_cache_entries").set(self.len() as f64);
        if removed > 0 {
            debug!(removed, "evicted expired order books");
        }
        removed
    }

    /// Warms the cache through the batched endpoint, [`MAX_BATCH_BOOKS`] ids per call.
    /// A failed chunk is logged and skipped. Returns how many books were stored.
    ///
    /// A key fetched individually while its batch was outstanding, or still being
    /// fetched, keeps that result.
    pub async fn prefetch(&self, token_ids: &[String]) -> usize {
        let mut stored = 0;
        for chunk in token_ids.chunks(MAX_BATCH_BOOKS) {
            let requested_at = Instant::now();
            let result = self
                .retry
                .execute("get_order_books", || self.source.get_order_books(chunk))
                .await;
            match result {
                Ok(books) => {
                    let now = Instant::now();
                    let in_flight = self.in_flight.lock();
                    let mut entries = self.entries.write();
                    for book in books {
                        let key = book.token_id.clone();
                        let superseded = in_flight.contains_key(&key)
                            || entries.get(&key).is_some_and(|e| e.fetched_at >= requested_at);
                        if superseded {
                            debug!(token_id = %key, "prefetch result older than cached book, dropped");
                            continue;
                        }
                        entries.insert(key, CachedOrderBook { book: Arc::new(book), fetched_at: now });
                        stored += 1;
                    }
                }
                Err(e) => warn!(chunk_len = chunk.len(), error = %e, "order book prefetch failed"),
            }
        }
        stored
    }

    /// Spawns the hot-refresh and cleanup timers. Dropping or stopping the returned
    /// tasks ends them.
    pub fn start_maintenance(
        self: &Arc<Self>,
        refresh_every: Duration,
        cleanup_every: Duration,
        events: broadcast::Sender<TaskEvent>,
    ) -> (PeriodicTask, PeriodicTask) {
        let cache = Arc::clone(self);
        let refresh = PeriodicTask::spawn("hot_refresh", refresh_every, events.clone(), move || {
            let cache = Arc::clone(&cache);
            async move {
                let report = cache.refresh_hot_markets().await;
                if report.failed > 0 {
                    TaskOutcome::Failed(format!("{} of {} hot refreshes failed", report.failed, report.refreshed + report.failed))
                } else {
                    TaskOutcome::Completed
                }
            }
        });

        let cache = Arc::clone(self);
        let cleanup = PeriodicTask::spawn("cache_cleanup", cleanup_every, events, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.cleanup();
                TaskOutcome::Completed
            }
        });

        info!(
            refresh_secs = refresh_every.as_secs(),
            cleanup_secs = cleanup_every.as_secs(),
            "order book cache maintenance started"
        );
        (refresh, cleanup)
    }
}
