use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub request: RequestConfig,
    pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub max_retries: u32,
    /// Pause inserted between delivered items of one sync pass.
    pub retry_delay_ms: u64,
    pub json_timeout_secs: u64,
    pub file_timeout_secs: u64,
    pub sync_on_enqueue: bool,
    /// 0 disables the background trigger.
    pub background_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
    /// 0 disables the expired-cache sweep.
    pub cache_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    pub probe_url: Option<String>,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            request: RequestConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-sync");
        Self {
            url: format!(
                "sqlite://{}?mode=rwc",
                data_dir.join("offline-sync.db").display()
            ),
            max_connections: 5,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 100,
            json_timeout_secs: 30,
            file_timeout_secs: 120,
            sync_on_enqueue: true,
            background_interval_secs: 60,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            cache_ttl_secs: 300, // 5 minutes
            cache_sweep_interval_secs: 600,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_interval_secs: 30,
            probe_timeout_secs: 5,
        }
    }
}

impl SyncConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn json_timeout(&self) -> Duration {
        Duration::from_secs(self.json_timeout_secs)
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("OFFLINE_SYNC_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v.trim().to_string();
            }
        }
        if let Some(value) = env_u32("OFFLINE_SYNC_DATABASE_MAX_CONNECTIONS") {
            cfg.database.max_connections = value;
        }

        if let Some(value) = env_u32("OFFLINE_SYNC_MAX_RETRIES") {
            cfg.sync.max_retries = value;
        }
        if let Some(value) = env_u64("OFFLINE_SYNC_RETRY_DELAY_MS") {
            cfg.sync.retry_delay_ms = value;
        }
        if let Some(value) = env_u64("OFFLINE_SYNC_JSON_TIMEOUT_SECS") {
            cfg.sync.json_timeout_secs = value;
        }
        if let Some(value) = env_u64("OFFLINE_SYNC_FILE_TIMEOUT_SECS") {
            cfg.sync.file_timeout_secs = value;
        }
        if let Ok(v) = std::env::var("OFFLINE_SYNC_SYNC_ON_ENQUEUE") {
            cfg.sync.sync_on_enqueue = parse_bool(&v, cfg.sync.sync_on_enqueue);
        }
        if let Some(value) = env_u64("OFFLINE_SYNC_BACKGROUND_INTERVAL_SECS") {
            cfg.sync.background_interval_secs = value;
        }

        if let Some(value) = env_u64("OFFLINE_SYNC_REQUEST_TIMEOUT_SECS") {
            cfg.request.timeout_secs = value;
        }
        if let Some(value) = env_u64("OFFLINE_SYNC_CACHE_TTL_SECS") {
            cfg.request.cache_ttl_secs = value;
        }
        if let Some(value) = env_u64("OFFLINE_SYNC_CACHE_SWEEP_INTERVAL_SECS") {
            cfg.request.cache_sweep_interval_secs = value;
        }

        if let Ok(v) = std::env::var("OFFLINE_SYNC_PROBE_URL") {
            let trimmed = v.trim();
            cfg.connectivity.probe_url = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        if let Some(value) = env_u64("OFFLINE_SYNC_PROBE_INTERVAL_SECS") {
            cfg.connectivity.probe_interval_secs = value.max(1);
        }
        if let Some(value) = env_u64("OFFLINE_SYNC_PROBE_TIMEOUT_SECS") {
            cfg.connectivity.probe_timeout_secs = value.max(1);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.sync.max_retries == 0 {
            return Err("Sync max_retries must be greater than 0".to_string());
        }
        if self.sync.json_timeout_secs == 0 || self.sync.file_timeout_secs == 0 {
            return Err("Sync timeouts must be greater than 0".to_string());
        }
        if self.request.timeout_secs == 0 {
            return Err("Request timeout_secs must be greater than 0".to_string());
        }
        if self.connectivity.probe_interval_secs == 0 {
            return Err("Connectivity probe_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| parse_u64(&v))
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| parse_u32(&v))
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

/// Out-of-range values are treated like any other malformed value.
fn parse_u32(value: &str) -> Option<u32> {
    parse_u64(value).and_then(|v| u32::try_from(v).ok())
}
