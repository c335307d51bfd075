//! Twitter API v2 filtered-stream client.
//!
//! Implements the rule store and stream seams of `feed-core` over HTTP.
//! The stream body is newline-delimited JSON with blank-line heartbeats.

use anyhow::{Context, Result};
use async_trait::async_trait;
use feed_core::stream::EVENT_BUFFER;
use feed_core::{FeedError, FeedResult, FeedStream, FilterRule, PostEvent, RemoteRule, RuleStore, StreamEvent};
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const RULES_PATH: &str = "/2/tweets/search/stream/rules";
const STREAM_PATH: &str = "/2/tweets/search/stream";

/// Expansions needed to render retweets and resolve usernames.
const STREAM_PARAMS: [(&str, &str); 2] = [
    (
        "expansions",
        "author_id,referenced_tweets.id,referenced_tweets.id.author_id",
    ),
    ("user.fields", "username"),
];

#[derive(Debug, Deserialize)]
struct RulesResponse {
    #[serde(default)]
    data: Option<Vec<RemoteRule>>,
    #[serde(default)]
    errors: Option<Vec<ApiError>>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

impl ApiError {
    fn describe(&self) -> String {
        let text = self
            .detail
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("unknown error");
        match &self.value {
            Some(value) => format!("{text} ({value})"),
            None => text.to_string(),
        }
    }

    fn is_disconnect_notice(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|k| k.ends_with("operational-disconnect"))
    }
}

fn describe_errors(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(ApiError::describe)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Serialize)]
struct AddRules<'a> {
    add: &'a [FilterRule],
}

#[derive(Serialize)]
struct DeleteRules<'a> {
    delete: DeleteIds<'a>,
}

#[derive(Serialize)]
struct DeleteIds<'a> {
    ids: &'a [String],
}

#[derive(Debug, Clone)]
pub struct TwitterClient {
    client: Client,
    stream_client: Client,
    api_url: String,
    bearer_token: String,
}

impl TwitterClient {
    pub fn new(api_url: &str, bearer_token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        // no overall timeout: the stream stays open indefinitely
        let stream_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create streaming HTTP client")?;

        Ok(Self {
            client,
            stream_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bearer_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Send a rules request and decode its body; `wrap` picks the error kind.
    async fn rules_call(
        &self,
        request: reqwest::RequestBuilder,
        wrap: fn(String) -> FeedError,
    ) -> FeedResult<RulesResponse> {
        let response = request
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| wrap(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(wrap(format!("status {status}: {body}")));
        }

        let parsed: RulesResponse = response
            .json()
            .await
            .map_err(|e| wrap(format!("decoding response: {e}")))?;

        match &parsed.errors {
            Some(errors) if !errors.is_empty() => Err(wrap(describe_errors(errors))),
            _ => Ok(parsed),
        }
    }
}

#[async_trait]
impl RuleStore for TwitterClient {
    async fn list_rules(&self) -> FeedResult<Vec<RemoteRule>> {
        let request = self.client.get(self.url(RULES_PATH));
        let response = self.rules_call(request, FeedError::RemoteFetch).await?;
        let rules = response.data.unwrap_or_default();
        debug!(count = rules.len(), "Listed installed filter rules");
        Ok(rules)
    }

    async fn add_rules(&self, rules: &[FilterRule]) -> FeedResult<()> {
        let request = self
            .client
            .post(self.url(RULES_PATH))
            .json(&AddRules { add: rules });
        self.rules_call(request, FeedError::RemoteMutation).await?;
        Ok(())
    }

    async fn delete_rules(&self, ids: &[String]) -> FeedResult<()> {
        let request = self
            .client
            .post(self.url(RULES_PATH))
            .json(&DeleteRules {
                delete: DeleteIds { ids },
            });
        self.rules_call(request, FeedError::RemoteMutation).await?;
        Ok(())
    }
}

#[async_trait]
impl FeedStream for TwitterClient {
    async fn open(&self) -> FeedResult<mpsc::Receiver<StreamEvent>> {
        info!("Connecting to filtered stream");
        let response = self
            .stream_client
            .get(self.url(STREAM_PATH))
            .query(&STREAM_PARAMS[..])
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| FeedError::StreamOpen(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::StreamOpen(format!("status {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(read_stream(response, tx));
        Ok(rx)
    }
}

/// Forward stream lines as events until the body ends or the receiver
/// is dropped. Returning drops the response and closes the connection.
async fn read_stream(response: Response, tx: mpsc::Sender<StreamEvent>) {
    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(runtime_error(format!("transport: {e}"))).await;
                return;
            }
        };
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let event = parse_line(String::from_utf8_lossy(&line).trim());
            if tx.send(event).await.is_err() {
                debug!("Stream receiver dropped, disconnecting");
                return;
            }
        }
    }

    let rest = String::from_utf8_lossy(&buffer).trim().to_string();
    if !rest.is_empty() {
        let _ = tx.send(parse_line(&rest)).await;
    }
    debug!("Stream body ended");
}

fn runtime_error(detail: String) -> StreamEvent {
    StreamEvent::Error(FeedError::StreamRuntime(detail))
}

/// Classify one stream line.
pub(crate) fn parse_line(line: &str) -> StreamEvent {
    if line.is_empty() {
        return StreamEvent::KeepAlive;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return runtime_error(format!("malformed stream data: {e}")),
    };

    if value.get("data").is_some() {
        return match serde_json::from_value::<PostEvent>(value) {
            Ok(post) => StreamEvent::Post(Box::new(post)),
            Err(e) => runtime_error(format!("undecodable post: {e}")),
        };
    }

    if let Some(errors) = value.get("errors") {
        return match serde_json::from_value::<Vec<ApiError>>(errors.clone()) {
            Ok(errors) if errors.iter().any(ApiError::is_disconnect_notice) => {
                StreamEvent::System(describe_errors(&errors))
            }
            Ok(errors) => runtime_error(describe_errors(&errors)),
            Err(_) => {
                warn!(data = %line, "Unrecognized stream error payload");
                runtime_error(errors.to_string())
            }
        };
    }

    StreamEvent::System(line.to_string())
}
