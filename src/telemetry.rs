use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured filter when set.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;
    describe_metrics();

    tracing::info!(port, "prometheus exporter listening on /metrics");
    metrics::gauge!("polysync_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_port: u16) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(feature = "metrics-exporter")]
fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!("polysync_upstream_retries_total", "Upstream calls retried, by call");
    describe_counter!("polysync_sync_passes_total", "Catalog sync passes completed");
    describe_counter!("polysync_sync_failures_total", "Catalog sync passes aborted");
    describe_counter!("polysync_sync_skipped_total", "Sync triggers dropped while a pass was running");
    describe_counter!("polysync_sync_pages_total", "Event pages fetched");
    describe_counter!("polysync_orderbook_cache_hits_total", "Fresh order books served from cache");
    describe_counter!("polysync_orderbook_cache_misses_total", "Order book lookups that went upstream");
    describe_counter!("polysync_orderbook_stale_served_total", "Stale order books served after a failed fetch");
    describe_counter!("polysync_task_runs_total", "Periodic task runs, by task and outcome");
    describe_gauge!("polysync_orderbook_cache_entries", "Order books held after the last cleanup");
}
