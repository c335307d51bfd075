//! Convergence of installed filter rules onto the desired set.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::FeedResult;
use crate::types::{FilterRule, RemoteRule};

/// Remote filter-rule service.
///
/// Add and delete are batch calls that either succeed for every member or
/// fail as a whole.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All installed rules. Fails with `FeedError::RemoteFetch`.
    async fn list_rules(&self) -> FeedResult<Vec<RemoteRule>>;

    /// Install rules. Fails with `FeedError::RemoteMutation`.
    async fn add_rules(&self, rules: &[FilterRule]) -> FeedResult<()>;

    /// Remove rules by server id. Fails with `FeedError::RemoteMutation`.
    async fn delete_rules(&self, ids: &[String]) -> FeedResult<()>;
}

/// What one synchronization changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub kept: usize,
    pub added: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.deleted == 0
    }
}

/// Make the installed rule set equal `desired` with at most one delete and
/// one add call.
///
/// Installed records whose `(value, tag)` is desired are kept; everything
/// else, including duplicate copies of a desired rule, is deleted. On error
/// the remote state is whatever the failed call left, and the next cycle
/// starts over from a fresh listing.
pub async fn synchronize(
    store: &dyn RuleStore,
    desired: &BTreeSet<FilterRule>,
) -> FeedResult<SyncReport> {
    let installed = store.list_rules().await?;

    let mut missing = desired.clone();
    let mut to_delete = Vec::new();
    let mut kept = 0;
    for record in installed {
        if missing.remove(&record.rule) {
            kept += 1;
        } else {
            debug!(rule_id = %record.id, value = %record.rule.value, "Rule marked for deletion");
            to_delete.push(record.id);
        }
    }

    if !to_delete.is_empty() {
        store.delete_rules(&to_delete).await?;
        info!(count = to_delete.len(), "Deleted stale filter rules");
    }

    let to_add: Vec<FilterRule> = missing.into_iter().collect();
    if !to_add.is_empty() {
        store.add_rules(&to_add).await?;
        info!(count = to_add.len(), "Added filter rules");
    }

    Ok(SyncReport {
        kept,
        added: to_add.len(),
        deleted: to_delete.len(),
    })
}
