//! Remote follow lists: JSON documents listing accounts to track.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct AccountList {
    #[serde(default)]
    entries: Vec<AccountEntry>,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Clone)]
pub struct FollowListClient {
    client: Client,
}

impl FollowListClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// Fetch `{"entries":[{"id":"..."}]}` from `url`, skipping empty ids.
    pub async fn fetch(&self, url: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Fetching account list {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Fetching account list {url}: status {status}");
        }

        let list: AccountList = response
            .json()
            .await
            .with_context(|| format!("Decoding account list {url}"))?;

        let ids: Vec<String> = list
            .entries
            .into_iter()
            .map(|e| e.id)
            .filter(|id| !id.is_empty())
            .collect();
        debug!(url = %url, count = ids.len(), "Fetched account list");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn fetches_non_empty_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "entries": [{"id": "1"}, {"id": ""}, {"name": "no id"}, {"id": "2"}]
            })))
            .mount(&server)
            .await;

        let client = FollowListClient::new().unwrap();
        let ids = client.fetch(&format!("{}/list.json", server.uri())).await.unwrap();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = FollowListClient::new().unwrap();
        let err = client.fetch(&server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("status 500"));
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = FollowListClient::new().unwrap();
        let err = client.fetch(&server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("Decoding account list"));
    }
}
