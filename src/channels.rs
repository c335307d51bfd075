//! Channel map resolution from configuration.
//!
//! The config file is re-read on every refresh cycle, so edits to tracked
//! accounts or channels apply without a restart.

use anyhow::Result;
use async_trait::async_trait;
use feed_core::{ChannelMap, FeedError, FeedResult, RoutingSnapshot, SearchQuery, SnapshotSource};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::follow_list::FollowListClient;

/// Build the id → channels map and the tagged search queries.
///
/// Remote list members (minus exclusions) come before a channel's static
/// users; channels are visited in file order.
pub async fn resolve_snapshot(config: &Config, lists: &FollowListClient) -> Result<RoutingSnapshot> {
    let mut channels = ChannelMap::new();
    let mut queries = Vec::new();

    for channel in &config.channels {
        if let Some(url) = channel.remote_list_url.as_deref().filter(|u| !u.is_empty()) {
            let excluded: HashSet<&str> =
                channel.excluded_users.iter().map(|u| u.id.as_str()).collect();
            let listed = lists.fetch(url).await?;
            let before = channels.len();
            for id in listed.iter().filter(|id| !excluded.contains(id.as_str())) {
                channels.insert(id.as_str(), channel.id.as_str());
            }
            info!(
                channel = %channel.id,
                listed = listed.len(),
                new_ids = channels.len() - before,
                "Resolved remote follow list"
            );
        }

        for user in &channel.users {
            channels.insert(user.id.as_str(), channel.id.as_str());
        }

        if let Some(query) = channel.search_query.as_deref() {
            if !query.trim().is_empty() {
                queries.push(SearchQuery::new(channel.id.as_str(), query));
            }
        }
    }

    Ok(RoutingSnapshot { channels, queries })
}

/// Snapshot source backed by the config file on disk.
pub struct ConfigSource {
    path: PathBuf,
    lists: FollowListClient,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>, lists: FollowListClient) -> Self {
        Self {
            path: path.into(),
            lists,
        }
    }

    async fn load(&self) -> Result<RoutingSnapshot> {
        let config = Config::load_from_file(&self.path)?;
        config.validate()?;
        resolve_snapshot(&config, &self.lists).await
    }
}

#[async_trait]
impl SnapshotSource for ConfigSource {
    async fn resolve(&self) -> FeedResult<RoutingSnapshot> {
        self.load()
            .await
            .map_err(|e| FeedError::ConfigResolution(format!("{e:#}")))
    }
}
