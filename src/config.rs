use anyhow::{Context, Result};
use feed_core::rules::TAG_SEPARATOR;
use feed_core::{SupervisorConfig, MAX_RULE_LENGTH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// A destination channel and the accounts/search relayed into it.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChannelConfig {
    #[serde(alias = "discord_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub users: Vec<TwitterUser>,
    pub remote_list_url: Option<String>,
    #[serde(default)]
    pub excluded_users: Vec<TwitterUser>,
    pub search_query: Option<String>,
}

/// Twitter account. Identity is `id`; `name` is only for humans.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwitterUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwitterConfig {
    #[serde(default = "default_twitter_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DiscordConfig {
    #[serde(default = "default_discord_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CredentialsConfig {
    /// JSON file with `twitter/bearer_token` and `discord/token`.
    pub secrets_file: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            api_url: default_twitter_api_url(),
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_url: default_discord_api_url(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_reconnect_delay_secs() -> u64 {
    30
}

fn default_refresh_interval_secs() -> u64 {
    4 * 60 * 60
}

fn default_keepalive_interval_secs() -> u64 {
    5
}

fn default_stall_timeout_secs() -> u64 {
    90
}

fn default_twitter_api_url() -> String {
    "https://api.twitter.com".to_string()
}

fn default_discord_api_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_bind_address() -> String {
    let port = std::env::var("PORT")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "8080".to_string());
    format!("0.0.0.0:{port}")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl StreamConfig {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let expanded_path = shellexpand::tilde(&path.to_string_lossy()).to_string();
        let content = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)?;
        config.expand_paths();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse TOML config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            anyhow::bail!("At least one [[channels]] entry is required");
        }

        // a channel may appear in several entries, e.g. one per remote list
        for channel in &self.channels {
            if channel.id.trim().is_empty() {
                anyhow::bail!("Channel {:?} has an empty id", channel.name);
            }
            if channel.id.contains(TAG_SEPARATOR) {
                anyhow::bail!("Channel id {:?} must not contain {:?}", channel.id, TAG_SEPARATOR);
            }
            if let Some(url) = &channel.remote_list_url {
                if !is_http_url(url) {
                    anyhow::bail!(
                        "Remote list URL for channel {} must start with http:// or https://",
                        channel.id
                    );
                }
            }
            if let Some(query) = &channel.search_query {
                if query.len() > MAX_RULE_LENGTH {
                    anyhow::bail!(
                        "Search query for channel {} is {} bytes, limit is {}",
                        channel.id,
                        query.len(),
                        MAX_RULE_LENGTH
                    );
                }
            }
            if channel.users.iter().any(|u| u.id.trim().is_empty()) {
                anyhow::bail!("Channel {} lists a user with an empty id", channel.id);
            }
        }

        if !is_http_url(&self.twitter.api_url) {
            anyhow::bail!("Twitter API URL must start with http:// or https://");
        }
        if !is_http_url(&self.discord.api_url) {
            anyhow::bail!("Discord API URL must start with http:// or https://");
        }

        if self.stream.refresh_interval_secs == 0 || self.stream.keepalive_interval_secs == 0 {
            anyhow::bail!("Stream refresh and keepalive intervals must be non-zero");
        }

        if self.api.bind.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("Invalid bind address: {}", self.api.bind);
        }

        Ok(())
    }

    pub fn expand_paths(&mut self) {
        if let Some(file) = &self.credentials.secrets_file {
            self.credentials.secrets_file = Some(shellexpand::tilde(file).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r##"
[[channels]]
id = "1001"
name = "officials"
users = [{ id = "12", name = "kyiv" }, { id = "34" }]

[[channels]]
discord_id = "1002"
name = "volunteers"
remote_list_url = "https://example.org/list.json"
excluded_users = [{ id = "56", name = "spam" }]
search_query = "#standwithukraine -is:retweet"

[api]
bind = "127.0.0.1:9000"
"##;

    #[test]
    fn parses_channels_with_defaults() {
        let config = Config::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].users[1].id, "34");
        assert_eq!(config.channels[1].id, "1002");
        assert_eq!(config.channels[1].excluded_users[0].id, "56");
        assert_eq!(config.stream.reconnect_delay_secs, 30);
        assert_eq!(config.stream.refresh_interval_secs, 14400);
        assert_eq!(config.twitter.api_url, "https://api.twitter.com");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn supervisor_config_uses_seconds() {
        let config = Config::parse(SAMPLE).unwrap();
        let sc = config.stream.supervisor_config();
        assert_eq!(sc.reconnect_delay, Duration::from_secs(30));
        assert_eq!(sc.refresh_interval, Duration::from_secs(4 * 60 * 60));
    }

    #[test]
    fn rejects_empty_channel_list() {
        let config = Config::parse("[api]\nbind = \"127.0.0.1:1\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn allows_repeated_channel_entries() {
        let config = Config::parse(
            r#"
[[channels]]
id = "1"
remote_list_url = "https://example.org/officials.json"
[[channels]]
id = "1"
remote_list_url = "https://example.org/volunteers.json"
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.channels.len(), 2);
    }

    #[test]
    fn rejects_channel_id_with_tag_separator() {
        let config = Config::parse("[[channels]]\nid = \"1,2\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_search_query() {
        let content = format!(
            "[[channels]]\nid = \"1\"\nsearch_query = \"{}\"\n",
            "x".repeat(MAX_RULE_LENGTH + 1)
        );
        let config = Config::parse(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_http_list_url() {
        let config = Config::parse(
            "[[channels]]\nid = \"1\"\nremote_list_url = \"ftp://example.org/x\"\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.channels[0].name, "officials");
        assert_eq!(config.api.bind, "127.0.0.1:9000");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load_from_file("/nonexistent/twitter-monitor.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
