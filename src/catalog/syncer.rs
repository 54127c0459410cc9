// Full catalog sync, one pass at a time
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::records::translate_event;
use crate::market_data::{EventsQuery, MarketDataSource, UpstreamError};
use crate::persist::{CatalogStore, PersistError};
use crate::retry::RetryingClient;
use crate::tasks::{self, PeriodicTask, TaskEvent, TaskOutcome};

pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

#[derive(Debug, Clone)]
pub struct SyncerConfig {
    pub interval: Duration,
    pub page_size: u32,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(300), page_size: PAGE_SIZE }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub pages: usize,
    pub events: usize,
    pub markets: usize,
    pub skipped_items: usize,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass was already running.
    Skipped,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog fetch failed at offset {offset}: {source}")]
    Upstream {
        offset: u32,
        #[source]
        source: UpstreamError,
    },

    #[error("store write failed: {0}")]
    Store(#[from] PersistError),
}

fn next_offset(offset: u32, page_size: u32) -> Option<u32> {
    offset.checked_add(page_size)
}

// Holds the Syncing state; drop puts it back to Idle whatever happened
struct SyncGuard<'a> {
    state: &'a Mutex<SyncState>,
}

impl<'a> SyncGuard<'a> {
    fn acquire(state: &'a Mutex<SyncState>) -> Option<Self> {
        let mut current = state.lock();
        if *current == SyncState::Syncing {
            return None;
        }
        *current = SyncState::Syncing;
        Some(Self { state })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = SyncState::Idle;
    }
}

pub struct CatalogSyncer {
    source: Arc<dyn MarketDataSource>,
    store: Arc<dyn CatalogStore>,
    retry: RetryingClient,
    config: SyncerConfig,
    state: Mutex<SyncState>,
    last_sync_at: Mutex<Option<DateTime<Utc>>>,
    timer: Mutex<Option<PeriodicTask>>,
    events: broadcast::Sender<TaskEvent>,
}

impl CatalogSyncer {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<dyn CatalogStore>,
        retry: RetryingClient,
        config: SyncerConfig,
    ) -> Self {
        Self {
            source,
            store,
            retry,
            config,
            state: Mutex::new(SyncState::Idle),
            last_sync_at: Mutex::new(None),
            timer: Mutex::new(None),
            events: tasks::event_channel(),
        }
    }

    /// Outcome of every scheduled pass.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Completion time of the last successful pass.
    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_at.lock()
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Runs one pass right away (so a cold start isn't empty), then every `interval`.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            warn!("catalog syncer already started");
            return;
        }

        // weak so dropping the syncer drops the timer with it
        let syncer = Arc::downgrade(self);
        *timer = Some(PeriodicTask::spawn(
            "catalog_sync",
            self.config.interval,
            self.events.clone(),
            move || {
                let syncer = syncer.upgrade();
                async move {
                    let Some(syncer) = syncer else {
                        return TaskOutcome::Skipped;
                    };
                    match syncer.sync_all().await {
                        Ok(SyncOutcome::Completed(_)) => TaskOutcome::Completed,
                        Ok(SyncOutcome::Skipped) => TaskOutcome::Skipped,
                        Err(e) => TaskOutcome::Failed(e.to_string()),
                    }
                }
            },
        ));
        info!(interval_secs = self.config.interval.as_secs(), "catalog syncer started");
    }

    /// Cancels the timer. A pass already running is left to finish.
    pub fn stop(&self) {
        if let Some(task) = self.timer.lock().take() {
            task.stop();
            info!("catalog syncer stopped");
        }
    }

    pub async fn sync_all(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_guard) = SyncGuard::acquire(&self.state) else {
            metrics::counter!("polysync_sync_skipped_total").increment(1);
            warn!("catalog sync already in progress, dropping this trigger");
            return Ok(SyncOutcome::Skipped);
        };

        let started = Instant::now();
        info!("catalog sync started");
        let report = match self.sweep(started).await {
            Ok(report) => report,
            Err(e) => {
                metrics::counter!("polysync_sync_failures_total").increment(1);
                return Err(e);
            }
        };

        *self.last_sync_at.lock() = Some(report.finished_at);
        metrics::counter!("polysync_sync_passes_total").increment(1);
        info!(
            pages = report.pages,
            events = report.events,
            markets = report.markets,
            skipped = report.skipped_items,
            duration_ms = report.duration.as_millis() as u64,
            "catalog sync completed"
        );
        Ok(SyncOutcome::Completed(report))
    }

    #[instrument(level = "debug", skip_all)]
    async fn sweep(&self, started: Instant) -> Result<SyncReport, SyncError> {
        let page_size = self.config.page_size.max(1);
        let mut offset: u32 = 0;
        let (mut pages, mut events, mut markets, mut skipped) = (0usize, 0usize, 0usize, 0usize);

        loop {
            let query = EventsQuery::catalog_page(page_size, offset);
            let page = self
                .retry
                .execute("get_events", || self.source.get_events(&query))
                .await
                .map_err(|source| SyncError::Upstream { offset, source })?;

            let fetched = page.len();
            pages += 1;
            metrics::counter!("polysync_sync_pages_total").increment(1);

            let now = Utc::now();
            for raw in &page {
                let gamma = match raw.decode() {
                    Ok(gamma) => gamma,
                    Err(e) => {
                        skipped += 1;
                        warn!(offset, error = %e, "skipping malformed catalog event");
                        continue;
                    }
                };

                let bundle = translate_event(&gamma, &raw.payload, now);
                self.store.upsert_event(&bundle.event).await?;
                for market in &bundle.markets {
                    self.store.upsert_market(market).await?;
                }
                events += 1;
                markets += bundle.markets.len();
                skipped += bundle.skipped_markets;
            }
            debug!(offset, fetched, "catalog page committed");

            // a short (or empty) page is the last one
            if fetched < page_size as usize {
                break;
            }
            match next_offset(offset, page_size) {
                Some(next) => offset = next,
                None => {
                    warn!(offset, page_size, "catalog offset exhausted, ending pass");
                    break;
                }
            }
        }

        Ok(SyncReport {
            pages,
            events,
            markets,
            skipped_items: skipped,
            finished_at: Utc::now(),
            duration: started.elapsed(),
        })
    }
}
