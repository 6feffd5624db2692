//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.wsbridge/config.json`) and
//! environment. Tokens can always be supplied via env vars, which take
//! precedence over the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Slack workspace settings.
    #[serde(default)]
    pub slack: SlackConfig,

    /// WhatsApp side settings.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Slack tokens and workspace identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Bot token (xoxb-...). Overridden by SLACK_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// Own bot id (Bxxxxxxx), used to suppress echo of the bridge's own
    /// posts.
    pub bot_id: Option<String>,
    /// User group whose members are invited to every provisioned channel.
    /// Overridden by SLACK_REVIEWER_GROUP_ID env when set.
    pub reviewer_group_id: Option<String>,
    /// Channel for connection-status notifications. Overridden by
    /// SLACK_MAIN_CHANNEL env when set.
    pub main_channel: Option<String>,
}

/// WhatsApp client settings (the client itself lives outside this crate).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    /// Phone number used by the pairing-code login flow of the external
    /// client.
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Path of the bridge document (default ~/.wsbridge/bridge.json).
    pub document_path: Option<PathBuf>,
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn config_non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the Slack bot token: env SLACK_BOT_TOKEN overrides config.
pub fn resolve_slack_token(config: &Config) -> Option<String> {
    env_non_empty("SLACK_BOT_TOKEN").or_else(|| config_non_empty(&config.slack.bot_token))
}

/// Resolve the reviewer user group: env SLACK_REVIEWER_GROUP_ID overrides config.
pub fn resolve_reviewer_group_id(config: &Config) -> Option<String> {
    env_non_empty("SLACK_REVIEWER_GROUP_ID")
        .or_else(|| config_non_empty(&config.slack.reviewer_group_id))
}

/// Resolve the status-notification channel: env SLACK_MAIN_CHANNEL overrides config.
pub fn resolve_main_channel(config: &Config) -> Option<String> {
    env_non_empty("SLACK_MAIN_CHANNEL").or_else(|| config_non_empty(&config.slack.main_channel))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WSBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".wsbridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the bridge document path: config override or the default next to
/// the config directory.
pub fn resolve_store_path(config: &Config) -> PathBuf {
    config
        .storage
        .document_path
        .clone()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".wsbridge").join("bridge.json"))
                .unwrap_or_else(|| PathBuf::from("bridge.json"))
        })
}

/// Load config from the default path (or WSBRIDGE_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
