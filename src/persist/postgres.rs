use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};

use super::{CatalogStore, PersistResult};
use crate::catalog::{CatalogEvent, CatalogMarket};

// Applied in order by `ensure_schema`; every statement is safe to re-run.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS catalog_events (
        id             TEXT PRIMARY KEY,
        slug           TEXT,
        title          TEXT,
        description    TEXT,
        image          TEXT,
        icon           TEXT,
        start_date     TIMESTAMPTZ,
        end_date       TIMESTAMPTZ,
        active         BOOLEAN NOT NULL,
        closed         BOOLEAN NOT NULL,
        volume         DOUBLE PRECISION NOT NULL DEFAULT 0,
        volume_24hr    DOUBLE PRECISION NOT NULL DEFAULT 0,
        liquidity      DOUBLE PRECISION NOT NULL DEFAULT 0,
        open_interest  DOUBLE PRECISION NOT NULL DEFAULT 0,
        tag_slugs      TEXT[] NOT NULL DEFAULT '{}',
        tags           JSONB NOT NULL DEFAULT '[]',
        raw            JSONB NOT NULL,
        synced_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_markets (
        id                 TEXT PRIMARY KEY,
        event_id           TEXT NOT NULL REFERENCES catalog_events (id),
        condition_id       TEXT,
        question           TEXT,
        slug               TEXT,
        outcomes           TEXT[] NOT NULL,
        outcome_prices     TEXT[] NOT NULL,
        clob_token_ids     TEXT[] NOT NULL,
        active             BOOLEAN NOT NULL,
        closed             BOOLEAN NOT NULL,
        volume             DOUBLE PRECISION NOT NULL DEFAULT 0,
        liquidity          DOUBLE PRECISION NOT NULL DEFAULT 0,
        end_date           TIMESTAMPTZ,
        onchain_market_id  BIGINT,
        synced_at          TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS catalog_events_open_idx ON catalog_events (active, closed, volume DESC)",
    "CREATE INDEX IF NOT EXISTS catalog_markets_event_idx ON catalog_markets (event_id)",
    "CREATE INDEX IF NOT EXISTS catalog_markets_tokens_idx ON catalog_markets USING GIN (clob_token_ids)",
];

const UPSERT_EVENT: &str = r#"
    INSERT INTO catalog_events (
        id, slug, title, description, image, icon, start_date, end_date, active, closed,
        volume, volume_24hr, liquidity, open_interest, tag_slugs, tags, raw, synced_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
    ON CONFLICT (id) DO UPDATE SET
        slug = EXCLUDED.slug,
        title = EXCLUDED.title,
        description = EXCLUDED.description,
        image = EXCLUDED.image,
        icon = EXCLUDED.icon,
        start_date = EXCLUDED.start_date,
        end_date = EXCLUDED.end_date,
        active = EXCLUDED.active,
        closed = EXCLUDED.closed,
        volume = EXCLUDED.volume,
        volume_24hr = EXCLUDED.volume_24hr,
        liquidity = EXCLUDED.liquidity,
        open_interest = EXCLUDED.open_interest,
        tag_slugs = EXCLUDED.tag_slugs,
        tags = EXCLUDED.tags,
        raw = EXCLUDED.raw,
        synced_at = EXCLUDED.synced_at
"#;

// onchain_market_id keeps whatever was stored first
const UPSERT_MARKET: &str = r#"
    INSERT INTO catalog_markets (
        id, event_id, condition_id, question, slug, outcomes, outcome_prices, clob_token_ids,
        active, closed, volume, liquidity, end_date, onchain_market_id, synced_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
    ON CONFLICT (id) DO UPDATE SET
        event_id = EXCLUDED.event_id,
        condition_id = EXCLUDED.condition_id,
        question = EXCLUDED.question,
        slug = EXCLUDED.slug,
        outcomes = EXCLUDED.outcomes,
        outcome_prices = EXCLUDED.outcome_prices,
        clob_token_ids = EXCLUDED.clob_token_ids,
        active = EXCLUDED.active,
        closed = EXCLUDED.closed,
        volume = EXCLUDED.volume,
        liquidity = EXCLUDED.liquidity,
        end_date = EXCLUDED.end_date,
        onchain_market_id = COALESCE(catalog_markets.onchain_market_id, EXCLUDED.onchain_market_id),
        synced_at = EXCLUDED.synced_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    connection_pool: PgPool,
}

impl PostgresCatalogStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> PersistResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to catalog database");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(connection_pool: PgPool) -> Self {
        Self { connection_pool }
    }

    pub async fn ensure_schema(&self) -> PersistResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.connection_pool).await?;
        }
        debug!("catalog schema ready");
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn upsert_event(&self, event: &CatalogEvent) -> PersistResult<()> {
        sqlx::query(UPSERT_EVENT)
            .bind(&event.id)
            .bind(&event.slug)
            .bind(&event.title)
            .bind(&event.description)
            .bind(&event.image)
            .bind(&event.icon)
            .bind(event.start_date)
            .bind(event.end_date)
            .bind(event.active)
            .bind(event.closed)
            .bind(event.volume)
            .bind(event.volume_24hr)
            .bind(event.liquidity)
            .bind(event.open_interest)
            .bind(&event.tag_slugs)
            .bind(Json(&event.tags))
            .bind(Json(&event.raw))
            .bind(event.synced_at)
            .execute(&self.connection_pool)
            .await?;
        Ok(())
    }

    async fn upsert_market(&self, market: &CatalogMarket) -> PersistResult<()> {
        sqlx::query(UPSERT_MARKET)
            .bind(&market.id)
            .bind(&market.event_id)
            .bind(&market.condition_id)
            .bind(&market.question)
            .bind(&market.slug)
            .bind(&market.outcomes)
            .bind(&market.outcome_prices)
            .bind(&market.clob_token_ids)
            .bind(market.active)
            .bind(market.closed)
            .bind(market.volume)
            .bind(market.liquidity)
            .bind(market.end_date)
            .bind(market.onchain_market_id)
            .bind(market.synced_at)
            .execute(&self.connection_pool)
            .await?;
        Ok(())
    }
}
