//! Platform credentials: a JSON secrets file when configured, else env.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;

use crate::config::CredentialsConfig;

pub const TWITTER_TOKEN_ENV: &str = "TWITTER_BEARER_TOKEN";
pub const DISCORD_TOKEN_ENV: &str = "DISCORD_TOKEN";

const TWITTER_TOKEN_KEY: &str = "twitter/bearer_token";
const DISCORD_TOKEN_KEY: &str = "discord/token";

#[derive(Clone)]
pub struct Credentials {
    pub twitter_bearer_token: String,
    pub discord_bot_token: String,
}

// Tokens must never end up in logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("twitter_bearer_token", &"<redacted>")
            .field("discord_bot_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn load(config: &CredentialsConfig) -> Result<Self> {
        match &config.secrets_file {
            Some(path) => Self::from_secrets_file(path),
            None => Self::from_env(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), TWITTER_TOKEN_ENV, DISCORD_TOKEN_ENV)
            .context("Failed to read credentials from environment")
    }

    pub fn from_secrets_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read secrets file: {path}"))?;
        let json: Value =
            serde_json::from_str(&content).with_context(|| "Failed to parse secrets JSON")?;

        Self::from_lookup(
            |key| json.get(key).and_then(|v| v.as_str()).map(str::to_string),
            TWITTER_TOKEN_KEY,
            DISCORD_TOKEN_KEY,
        )
        .with_context(|| format!("Incomplete secrets file: {path}"))
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        twitter_key: &str,
        discord_key: &str,
    ) -> Result<Self> {
        let require = |key: &str| -> Result<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{key} is missing or empty"))
        };

        Ok(Self {
            twitter_bearer_token: require(twitter_key)?,
            discord_bot_token: require(discord_key)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn lookup_requires_both_tokens() {
        let vars: HashMap<&str, &str> = [("T", "tw"), ("D", "  ")].into_iter().collect();
        let err = Credentials::from_lookup(|k| vars.get(k).map(|v| v.to_string()), "T", "D")
            .unwrap_err();
        assert!(err.to_string().contains("D is missing or empty"));
    }

    #[test]
    fn reads_secrets_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"twitter/bearer_token": "AAAA", "discord/token": "bot-token"}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let creds = Credentials::load(&CredentialsConfig {
            secrets_file: Some(file.path().to_string_lossy().to_string()),
        })
        .unwrap();
        assert_eq!(creds.twitter_bearer_token, "AAAA");
        assert_eq!(creds.discord_bot_token, "bot-token");
    }

    #[test]
    fn secrets_file_missing_key_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"twitter/bearer_token": "AAAA"}}"#).unwrap();
        file.flush().unwrap();

        let err = Credentials::from_secrets_file(&file.path().to_string_lossy()).unwrap_err();
        assert!(format!("{err:#}").contains("discord/token is missing or empty"));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let creds = Credentials {
            twitter_bearer_token: "secret-1".into(),
            discord_bot_token: "secret-2".into(),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("secret"));
    }
}
