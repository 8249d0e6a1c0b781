use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub auto_sync: bool,
    pub sync_interval: u64,
    pub drain_on_enqueue: bool,
    pub coalesce_updates: bool,
    #[serde(default)]
    pub probe_interval: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: 1,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval: 300, // 5 minutes
            drain_on_enqueue: true,
            coalesce_updates: true,
            probe_interval: None,
        }
    }
}

fn default_database_url() -> String {
    let base = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("./data"));
    let path = base.join("mythrill").join("offline.db");
    format!("sqlite:{}?mode=rwc", path.display())
}

impl AppConfig {
    pub fn from_env() -> Self {
        // 既定値
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MYTHRILL_SYNC_DATABASE_URL") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.storage.database_url = trimmed.to_string();
            }
        }
        if let Some(value) = std::env::var("MYTHRILL_SYNC_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| parse_u64(&v))
        {
            cfg.storage.max_connections = value.clamp(1, u32::MAX as u64) as u32;
        }

        if let Ok(v) = std::env::var("MYTHRILL_SYNC_AUTO_SYNC") {
            cfg.sync.auto_sync = parse_bool(&v, cfg.sync.auto_sync);
        }
        if let Some(value) = std::env::var("MYTHRILL_SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| parse_u64(&v))
        {
            cfg.sync.sync_interval = value.max(1);
        }
        if let Ok(v) = std::env::var("MYTHRILL_SYNC_DRAIN_ON_ENQUEUE") {
            cfg.sync.drain_on_enqueue = parse_bool(&v, cfg.sync.drain_on_enqueue);
        }
        if let Ok(v) = std::env::var("MYTHRILL_SYNC_COALESCE_UPDATES") {
            cfg.sync.coalesce_updates = parse_bool(&v, cfg.sync.coalesce_updates);
        }
        if let Some(value) = std::env::var("MYTHRILL_SYNC_PROBE_INTERVAL_SECS")
            .ok()
            .and_then(|v| parse_u64(&v))
        {
            cfg.sync.probe_interval = if value == 0 { None } else { Some(value) };
        }

        if let Ok(v) = std::env::var("MYTHRILL_SYNC_LOG_LEVEL") {
            if !v.trim().is_empty() {
                cfg.logging.level = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("MYTHRILL_SYNC_JSON_LOGS") {
            cfg.logging.json = parse_bool(&v, cfg.logging.json);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.storage.database_url.trim().is_empty() {
            return Err("Storage database_url must not be empty".to_string());
        }
        if self.storage.max_connections == 0 {
            return Err("Storage max_connections must be greater than 0".to_string());
        }
        if self.sync.auto_sync && self.sync.sync_interval == 0 {
            return Err("Sync sync_interval must be greater than 0".to_string());
        }
        if let Some(0) = self.sync.probe_interval {
            return Err("Sync probe_interval must be greater than 0".to_string());
        }
        Ok(())
    }
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
