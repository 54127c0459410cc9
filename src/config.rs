// defaults < polysync.toml < POLYSYNC__* env (e.g. POLYSYNC__CACHE__HOT_TTL_SECS=10)
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::catalog::syncer::{SyncerConfig, PAGE_SIZE};
use crate::market_data::cache::{CacheTtls, COLD_TTL, HOT_TTL};
use crate::market_data::polymarket::{DEFAULT_CLOB_URL, DEFAULT_GAMMA_URL};
use crate::retry::RetryOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub log_filter: String,
    pub metrics_port: u16,
    pub upstream: UpstreamSettings,
    pub sync: SyncSettings,
    pub cache: CacheSettings,
    pub retry: RetryOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 5,
            log_filter: "info,polysync_rs=debug".to_string(),
            metrics_port: 9000,
            upstream: UpstreamSettings::default(),
            sync: SyncSettings::default(),
            cache: CacheSettings::default(),
            retry: RetryOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub gamma_url: String,
    pub clob_url: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            gamma_url: DEFAULT_GAMMA_URL.to_string(),
            clob_url: DEFAULT_CLOB_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub page_size: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { interval_secs: 300, page_size: PAGE_SIZE }
    }
}

impl SyncSettings {
    pub fn syncer_config(&self) -> SyncerConfig {
        SyncerConfig {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            page_size: self.page_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub hot_ttl_secs: u64,
    pub cold_ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub refresh_concurrency: usize,
    /// Tokens marked hot and prefetched when `run` starts.
    pub hot_tokens: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            hot_ttl_secs: HOT_TTL.as_secs(),
            cold_ttl_secs: COLD_TTL.as_secs(),
            refresh_interval_secs: 15,
            cleanup_interval_secs: 60,
            refresh_concurrency: 8,
            hot_tokens: Vec::new(),
        }
    }
}

impl CacheSettings {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            hot: Duration::from_secs(self.hot_ttl_secs),
            cold: Duration::from_secs(self.cold_ttl_secs),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("polysync").required(false),
        };

        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("POLYSYNC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if settings.database_url.is_none() {
            settings.database_url = std::env::var("DATABASE_URL").ok();
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.sync.syncer_config().interval, Duration::from_secs(300));
        assert_eq!(s.sync.syncer_config().page_size, 100);
        assert_eq!(s.cache.ttls(), CacheTtls::default());
        assert_eq!(s.retry, RetryOptions::default());
        assert_eq!(s.upstream.timeout(), Duration::from_secs(30));
        assert_eq!(s.upstream.gamma_url, DEFAULT_GAMMA_URL);
    }

    #[test]
    fn test_load_from_toml_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("polysync-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("polysync.toml");
        fs::write(
            &path,
            r#"
database_url = "postgres://localhost/catalog"

[sync]
interval_secs = 60

[cache]
hot_ttl_secs = 5
hot_tokens = ["111", "222"]

[retry]
max_retries = 1
"#,
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/catalog"));
        assert_eq!(s.sync.interval_secs, 60);
        assert_eq!(s.sync.page_size, 100);
        assert_eq!(s.cache.ttls().hot, Duration::from_secs(5));
        assert_eq!(s.cache.ttls().cold, COLD_TTL);
        assert_eq!(s.cache.hot_tokens, vec!["111".to_string(), "222".to_string()]);
        assert_eq!(s.retry.max_retries, 1);
        assert_eq!(s.retry.base_delay_ms, 1_000);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("polysync-definitely-missing.toml");
        assert!(Settings::load(Some(&path)).is_err());
    }
}
