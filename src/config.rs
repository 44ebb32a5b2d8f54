//! Service configuration: TOML file with environment overrides.

use crate::error::Result;
use anyhow::Context as _;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Debounce window length when neither file nor environment sets one.
const DEFAULT_DEBOUNCE_DELAY_SECS: u64 = 300;
const DEFAULT_SUMMARY_MODEL: &str = "gpt-5-mini";
const DEFAULT_LANGFUSE_BASE_URL: &str = "https://cloud.langfuse.com";
const DEFAULT_DATABASE_PATH: &str = "issuebot.db";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8420";
const DEFAULT_CONFIG_PATH: &str = "issuebot.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds an issue must stay quiet before its window settles.
    pub debounce_delay_secs: u64,
    /// Destination for mail we refuse to act on.
    pub admin_email: String,
    /// Discord webhook receiving summary cards.
    pub discord_webhook: String,
    /// Webhooks mirroring a settled-issue notification.
    pub forward_webhook_urls: Vec<String>,
    pub openai_api_key: String,
    /// Optional OpenAI-compatible gateway base URL.
    pub openai_base_url: Option<String>,
    pub summary_model: String,
    pub langfuse: LangfuseConfig,
    pub database_path: String,
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LangfuseConfig {
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_delay_secs: DEFAULT_DEBOUNCE_DELAY_SECS,
            admin_email: String::new(),
            discord_webhook: String::new(),
            forward_webhook_urls: Vec::new(),
            openai_api_key: String::new(),
            openai_base_url: None,
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            langfuse: LangfuseConfig::default(),
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl Default for LangfuseConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            secret_key: None,
            base_url: DEFAULT_LANGFUSE_BASE_URL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply environment
    /// overrides. A missing explicit path is an error; a missing default path
    /// just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_var("DEBOUNCE_DELAY").and_then(|raw| parse_seconds(&raw)) {
            self.debounce_delay_secs = secs;
        }
        if let Some(value) = env_var("ADMIN_EMAIL") {
            self.admin_email = value;
        }
        if let Some(value) = env_var("DISCORD_WEBHOOK") {
            self.discord_webhook = value;
        }
        if let Some(value) = env_var("WEBHOOK_FORWARD_URLS") {
            self.forward_webhook_urls = parse_forward_urls(&value);
        }
        if let Some(value) = env_var("OPENAI_API_KEY") {
            self.openai_api_key = value;
        }
        if let Some(value) = env_var("OPENAI_BASE_URL") {
            self.openai_base_url = Some(value);
        }
        if let Some(value) = env_var("SUMMARY_MODEL") {
            self.summary_model = value;
        }
        if let Some(value) = env_var("LANGFUSE_PUBLIC_KEY") {
            self.langfuse.public_key = Some(value);
        }
        if let Some(value) = env_var("LANGFUSE_SECRET_KEY") {
            self.langfuse.secret_key = Some(value);
        }
        if let Some(value) = env_var("LANGFUSE_BASE_URL") {
            self.langfuse.base_url = value;
        }
        if let Some(value) = env_var("ISSUEBOT_DB") {
            self.database_path = value;
        }
        if let Some(value) = env_var("ISSUEBOT_LISTEN") {
            self.listen_addr = value;
        }
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_secs(self.debounce_delay_secs)
    }

    /// Tracing to Langfuse is on only when both keys are present.
    pub fn langfuse_enabled(&self) -> bool {
        self.langfuse.public_key.is_some() && self.langfuse.secret_key.is_some()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Parse a seconds value from the environment, rejecting garbage rather than
/// silently zeroing the window.
fn parse_seconds(raw: &str) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(error) => {
            tracing::warn!(%error, value = raw, "ignoring unparseable DEBOUNCE_DELAY");
            None
        }
    }
}

/// Split a comma-separated webhook list, dropping empty entries.
pub fn parse_forward_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}
