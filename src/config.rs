// ABOUTME: Runtime configuration loaded from a TOML file
// ABOUTME: Secrets may be overridden by SULTS_API_TOKEN, DATABASE_URL, and TELEGRAM_BOT_TOKEN

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub store: StoreConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.sults.com.br/api/v1".to_string()
}

fn default_max_pages() -> u32 {
    50
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("SULTS_API_TOKEN") {
            self.api.token = token;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.store.url = url;
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api.token.is_empty() {
            bail!("API token is not set (config [api].token or SULTS_API_TOKEN)");
        }
        if self.store.url.is_empty() {
            bail!("Store URL is not set (config [store].url or DATABASE_URL)");
        }
        if self.telegram.bot_token.is_empty() {
            bail!("Telegram bot token is not set (config [telegram].bot_token or TELEGRAM_BOT_TOKEN)");
        }
        Ok(())
    }
}
