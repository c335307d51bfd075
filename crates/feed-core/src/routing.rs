//! Identifier → channel routing state.
//!
//! The mapping is rebuilt from configuration on every refresh cycle and
//! published wholesale. Dispatch tasks hold an `Arc` to whichever mapping was
//! current when they started, so they never observe a partial update.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::FeedResult;
use crate::rules::compile_rules;
use crate::types::FilterRule;

/// Tracked author id → destination channel ids (first-seen order, no dups).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMap {
    routes: BTreeMap<String, Vec<String>>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `author_id` to `channel_id` as well. Repeats are ignored.
    pub fn insert(&mut self, author_id: impl Into<String>, channel_id: impl Into<String>) {
        let channel_id = channel_id.into();
        let channels = self.routes.entry(author_id.into()).or_default();
        if !channels.contains(&channel_id) {
            channels.push(channel_id);
        }
    }

    pub fn channels_for(&self, author_id: &str) -> &[String] {
        self.routes.get(author_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tracked ids in sorted order.
    pub fn author_ids(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<A: Into<String>, C: Into<String>> FromIterator<(A, C)> for ChannelMap {
    fn from_iter<I: IntoIterator<Item = (A, C)>>(iter: I) -> Self {
        let mut map = ChannelMap::new();
        for (author, channel) in iter {
            map.insert(author, channel);
        }
        map
    }
}

/// A channel's raw search query, routed back to it by rule tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub channel_id: String,
    pub query: String,
}

impl SearchQuery {
    pub fn new(channel_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            query: query.into(),
        }
    }
}

/// Everything the core needs from one configuration load.
#[derive(Debug, Clone, Default)]
pub struct RoutingSnapshot {
    pub channels: ChannelMap,
    pub queries: Vec<SearchQuery>,
}

impl RoutingSnapshot {
    /// Desired rule set for this snapshot.
    pub fn rules(&self) -> FeedResult<BTreeSet<FilterRule>> {
        compile_rules(self.channels.author_ids(), &self.queries)
    }

}

/// Produces a fresh snapshot from configuration on every refresh cycle.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn resolve(&self) -> FeedResult<RoutingSnapshot>;
}

/// Holder of the currently published mapping.
#[derive(Debug, Default)]
pub struct RoutingTable {
    current: RwLock<Arc<ChannelMap>>,
}

impl RoutingTable {
    pub fn new(initial: ChannelMap) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Mapping visible to new dispatches.
    pub fn load(&self) -> Arc<ChannelMap> {
        self.current.read().clone()
    }

    /// Replace the mapping. Readers holding the old one keep it until done.
    pub fn publish(&self, next: ChannelMap) {
        *self.current.write() = Arc::new(next);
    }
}
