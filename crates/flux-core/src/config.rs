use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{FluxError, Result};

pub const DEFAULT_PORT: u16 = 8787;
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024;
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_HISTORY: usize = 40;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluxConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            provider: ProviderConfig::default(),
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
            webhooks: WebhooksConfig::default(),
            scheduler: SchedulerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl FluxConfig {
    /// Layers a TOML file (if present) under `FLUX_`-prefixed
    /// environment overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(figment::providers::Serialized::defaults(
            FluxConfig::default(),
        ));
        if let Some(path) = config_path {
            if std::path::Path::new(path).exists() {
                figment = figment.merge(Toml::file(path));
            }
        }
        figment = figment.merge(Env::prefixed("FLUX_").split("_"));
        figment
            .extract()
            .map_err(|e| FluxError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind: String,
    pub auth: AuthConfig,
    pub cors_allow_origin: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: "0.0.0.0".to_string(),
            auth: AuthConfig::default(),
            cors_allow_origin: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub jwt_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            jwt_secret: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    Password,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key_env: "FLUX_PROVIDER_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub data_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl DatabaseConfig {
    pub fn conversations_db(&self) -> PathBuf {
        self.data_dir.join("conversations.db")
    }
    pub fn auth_db(&self) -> PathBuf {
        self.data_dir.join("auth.db")
    }
    pub fn audit_db(&self) -> PathBuf {
        self.data_dir.join("audit.db")
    }
    pub fn webhooks_db(&self) -> PathBuf {
        self.data_dir.join("webhooks.db")
    }
    pub fn scheduler_db(&self) -> PathBuf {
        self.data_dir.join("scheduler.db")
    }
    pub fn usage_file(&self) -> PathBuf {
        self.data_dir.join("usage_data.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_tool_rounds: u32,
    pub tool_timeout_seconds: u64,
    pub max_history: usize,
    pub max_tokens: u32,
    pub llm_retry_count: u32,
    pub llm_base_delay_ms: u64,
    pub llm_max_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tool_timeout_seconds: DEFAULT_TOOL_TIMEOUT_SECS,
            max_history: DEFAULT_MAX_HISTORY,
            max_tokens: 4096,
            llm_retry_count: 3,
            llm_base_delay_ms: 500,
            llm_max_delay_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksConfig {
    pub enabled: bool,
    pub default_timeout_secs: u64,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub conversations_max_age_days: i64,
    pub audit_logs_max_age_days: i64,
    pub webhook_deliveries_max_age_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            conversations_max_age_days: 0,
            audit_logs_max_age_days: 90,
            webhook_deliveries_max_age_days: 30,
        }
    }
}
