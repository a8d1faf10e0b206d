// src/config/mod.rs
// Central configuration - settings.yaml merged with environment overrides.

pub mod helpers;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::Path;

lazy_static! {
    pub static ref CONFIG: GatewayConfig = GatewayConfig::load();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_size: usize,
    pub starvation_prevention: bool,
    pub aging_interval_sec: u64,
    pub default_priority: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 256,
            starvation_prevention: true,
            aging_interval_sec: 30,
            default_priority: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritiesConfig {
    pub ui: i64,
    pub critical: i64,
    pub standard: i64,
    pub background: i64,
}

impl Default for PrioritiesConfig {
    fn default() -> Self {
        Self {
            ui: 0,
            critical: 1,
            standard: 5,
            background: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub sweep_interval_sec: u64,
    pub idle_timeout_sec: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_sec: 1800,
            idle_timeout_sec: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub billing_day: u32,
    pub monthly_limit: u32,
    pub daily_limit_strategy: String,
    pub max_results: usize,
    pub max_chars_per_result: usize,
    pub fetch_timeout_sec: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            billing_day: 1,
            monthly_limit: 2000,
            daily_limit_strategy: "remaining_per_day".to_string(),
            max_results: 3,
            max_chars_per_result: 25_000,
            fetch_timeout_sec: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub recall_k: usize,
    pub recall_threshold: f32,
    pub collection: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_k: 3,
            recall_threshold: 1.2,
            collection: "knowledge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsFile {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub priorities: PrioritiesConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub queue: QueueConfig,
    pub priorities: PrioritiesConfig,
    pub session: SessionConfig,
    pub search: SearchConfig,
    pub memory: MemoryConfig,

    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub qdrant_url: String,
    pub search_api_key: Option<String>,
    pub log_level: String,
    pub log_format: String,
    pub default_system_prompt: Option<String>,

    pub model_base_url: String,
    pub model_api_key: Option<String>,
    pub model_name: String,
    pub embedding_base_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model_name: String,
    pub embedding_dim: u64,
    pub gpu_probe_binary: Option<String>,
}

impl GatewayConfig {
    /// Load `settings.yaml` (if present) and overlay environment variables.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let settings_path =
            helpers::env_or("GATEWAY_SETTINGS_PATH", "settings.yaml");
        let file = Self::read_settings_file(&settings_path);

        Self {
            queue: file.queue,
            priorities: file.priorities,
            session: file.session,
            search: file.search,
            memory: file.memory,

            host: helpers::env_or("GATEWAY_HOST", "127.0.0.1"),
            port: helpers::env_parsed_or("GATEWAY_PORT", 8080),
            database_url: helpers::env_or("DATABASE_URL", "sqlite://gateway.db"),
            qdrant_url: helpers::env_or("QDRANT_URL", "http://localhost:6334"),
            search_api_key: helpers::env_opt("SEARCH_API_KEY"),
            log_level: helpers::env_or("GATEWAY_LOG_LEVEL", "info"),
            log_format: helpers::env_or("GATEWAY_LOG_FORMAT", "compact"),
            default_system_prompt: helpers::env_opt("GATEWAY_DEFAULT_SYSTEM_PROMPT"),

            model_base_url: helpers::env_or("MODEL_BASE_URL", "http://127.0.0.1:8000/v1"),
            model_api_key: helpers::env_opt("MODEL_API_KEY"),
            model_name: helpers::env_or("MODEL_NAME", "local-model"),
            embedding_base_url: helpers::env_or("EMBEDDING_BASE_URL", "http://127.0.0.1:8000/v1"),
            embedding_api_key: helpers::env_opt("EMBEDDING_API_KEY"),
            embedding_model_name: helpers::env_or("EMBEDDING_MODEL_NAME", "local-embedding"),
            embedding_dim: helpers::env_parsed_or("EMBEDDING_DIM", 1024),
            gpu_probe_binary: helpers::env_opt("GPU_PROBE_BINARY"),
        }
    }

    fn read_settings_file(path: impl AsRef<Path>) -> SettingsFile {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => serde_yaml::from_str(&contents).unwrap_or_else(|e| {
                panic!(
                    "failed to parse {}: {e}",
                    path.as_ref().display()
                )
            }),
            Err(_) => SettingsFile::default(),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate config that's required once a given subsystem is actually used.
    /// Search degrades gracefully (see error handling table), so its key is
    /// checked lazily by the search module rather than here.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.max_size == 0 {
            anyhow::bail!("queue.max_size must be > 0");
        }
        Ok(())
    }
}
