// Catalog: stored records + the sync loop that keeps them fresh
pub mod records;
pub mod syncer;

pub use records::{CatalogEvent, CatalogMarket, EventBundle};
pub use syncer::{CatalogSyncer, SyncError, SyncOutcome, SyncReport, SyncState, SyncerConfig};
