//! Discord REST sink: one POST per destination channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use feed_core::{FeedError, FeedResult, MessageSink};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

#[derive(Debug, Clone)]
pub struct DiscordSink {
    client: Client,
    api_url: String,
    bot_token: String,
}

impl DiscordSink {
    pub fn new(api_url: &str, bot_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        // accept tokens pasted with their scheme
        let bot_token = bot_token.strip_prefix("Bot ").unwrap_or(bot_token).to_string();

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
        })
    }
}

#[async_trait]
impl MessageSink for DiscordSink {
    async fn send_message(&self, channel_id: &str, text: &str) -> FeedResult<()> {
        let dispatch_error = |reason: String| FeedError::Dispatch {
            channel: channel_id.to_string(),
            reason,
        };

        let url = format!("{}/channels/{channel_id}/messages", self.api_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&CreateMessage { content: text })
            .send()
            .await
            .map_err(|e| dispatch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(dispatch_error(format!("status {status}: {body}")));
        }

        debug!(channel = %channel_id, "Discord message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn posts_content_with_bot_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/1001/messages"))
            .and(header("authorization", "Bot abc"))
            .and(body_json(serde_json::json!({
                "content": "https://twitter.com/alice/status/1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = DiscordSink::new(&server.uri(), "Bot abc").unwrap();
        sink.send_message("1001", "https://twitter.com/alice/status/1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn forbidden_channel_is_dispatch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string(r#"{"message":"Missing Access"}"#))
            .mount(&server)
            .await;

        let sink = DiscordSink::new(&server.uri(), "abc").unwrap();
        let err = sink.send_message("77", "hi").await.unwrap_err();
        match err {
            FeedError::Dispatch { channel, reason } => {
                assert_eq!(channel, "77");
                assert!(reason.contains("403"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
