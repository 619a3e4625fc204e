//! Configuration loading.
//!
//! A typed `Settings` struct carries every knob the crawler recognizes;
//! values come from defaults, an optional TOML/JSON config file, and a
//! handful of environment variable overrides, in that order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::StorageKind;

/// Top-level settings with their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Portal base URL.
    pub base_url: String,
    /// User agent sent on every request.
    pub user_agent: String,
    /// Minimum spacing between outbound requests per worker.
    pub rate_limit_ms: u64,
    pub storage: StorageSettings,
    pub validation: ValidationSettings,
    pub scheduled: ScheduleSettings,
    pub bulk: BulkSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://www.rechtsprechung-im-internet.de".to_string(),
            user_agent: "LegalDocumentCrawler/1.0".to_string(),
            rate_limit_ms: 1000,
            storage: StorageSettings::default(),
            validation: ValidationSettings::default(),
            scheduled: ScheduleSettings::default(),
            bulk: BulkSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root of the archive tree; the metadata database and the search
    /// index live underneath it.
    pub base_path: PathBuf,
    /// Which backend(s) to write: archive, search, or dual.
    #[serde(rename = "type")]
    pub kind: StorageKind,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./legal-documents"),
            kind: StorageKind::Archive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub schema_enabled: bool,
    pub legaldocml_enabled: bool,
    pub ecli_enabled: bool,
    pub strict_mode: bool,
    pub async_validation: bool,
    pub timeout_seconds: u64,
    pub max_size_mib: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            schema_enabled: true,
            legaldocml_enabled: true,
            ecli_enabled: true,
            strict_mode: false,
            async_validation: true,
            timeout_seconds: 30,
            max_size_mib: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub enabled: bool,
    /// Days covered by the daily sweep.
    pub days_back: u32,
    pub daily_cron: String,
    pub weekly_cron: String,
    pub retry_cron: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            days_back: 7,
            daily_cron: "0 0 6 * * *".to_string(),
            weekly_cron: "0 0 2 * * Sun".to_string(),
            retry_cron: "0 0 */6 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSettings {
    pub max_concurrent_operations: usize,
    pub max_concurrent_checks: usize,
    pub default_rate_limit_ms: u64,
    pub default_max_concurrent_downloads: u32,
    pub discovery_timeout_hours: u64,
    pub stuck_operation_timeout_hours: u64,
    pub progress_update_interval_ms: u64,
    /// Whether recent discovery may fall back to a full range scan.
    pub full_scan_fallback: bool,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 2,
            max_concurrent_checks: 10,
            default_rate_limit_ms: 2000,
            default_max_concurrent_downloads: 5,
            discovery_timeout_hours: 2,
            stuck_operation_timeout_hours: 6,
            progress_update_interval_ms: 30_000,
            full_scan_fallback: true,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the config file (if any), then
    /// environment overrides.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Parse a config file by extension: TOML or JSON.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let settings = match ext {
            "json" => serde_json::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse JSON config: {e}"))?,
            _ => toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse TOML config: {e}"))?,
        };
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(base_url) = env_var("CRAWLER_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(user_agent) = env_var("CRAWLER_USER_AGENT") {
            self.user_agent = user_agent;
        }
        if let Some(rate) = env_var("CRAWLER_RATE_LIMIT_MS").and_then(|v| v.parse().ok()) {
            self.rate_limit_ms = rate;
        }
        if let Some(base_path) = env_var("CRAWLER_STORAGE_PATH") {
            self.storage.base_path = PathBuf::from(base_path);
        }
        if let Some(enabled) = env_var("CRAWLER_SCHEDULED_ENABLED") {
            self.scheduled.enabled = matches!(enabled.as_str(), "1" | "true" | "TRUE" | "True");
        }
    }

    /// Path of the SQLite database shared by documents and campaigns.
    pub fn database_path(&self) -> PathBuf {
        self.storage.base_path.join("crawler.db")
    }

    pub fn max_xml_size(&self) -> usize {
        self.validation.max_size_mib * 1024 * 1024
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
