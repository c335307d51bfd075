//! Filter rule compilation.
//!
//! Tracked authors are packed greedily into `from:<id> OR from:<id> ...`
//! groups under the remote length limit. Packing follows input order and is
//! never rebalanced, so the same sorted id list always yields the same groups.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{FeedError, FeedResult};
use crate::routing::SearchQuery;
use crate::types::FilterRule;

/// Hard limit on a rule value, in bytes.
pub const MAX_RULE_LENGTH: usize = 512;

const SEPARATOR: &str = " OR ";

/// Joins the channel ids of a query shared by several channels into one tag.
pub const TAG_SEPARATOR: &str = ",";

/// Pack `from:<id>` clauses into OR-joined groups of at most `limit` bytes.
///
/// A new group starts whenever appending the next clause (plus its separator)
/// would exceed `limit`. A single clause longer than `limit` is an error.
pub fn pack_author_rules(ids: &[String], limit: usize) -> FeedResult<Vec<String>> {
    let mut groups = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut clause_bytes = 0;

    for id in ids {
        let clause = format!("from:{id}");
        if clause.len() > limit {
            return Err(FeedError::RuleTooLong {
                value: clause,
                limit,
            });
        }

        // clauses so far + this clause + one separator per existing clause
        let packed_len = clause_bytes + clause.len() + current.len() * SEPARATOR.len();
        if packed_len > limit && !current.is_empty() {
            groups.push(current.join(SEPARATOR));
            current.clear();
            clause_bytes = 0;
        }

        clause_bytes += clause.len();
        current.push(clause);
    }

    if !current.is_empty() {
        groups.push(current.join(SEPARATOR));
    }
    Ok(groups)
}

/// Non-blank query values → owning channels, in first-seen order.
///
/// The remote service rejects two rules with the same value, so a query
/// shared by several channels is installed once, tagged with all of them.
pub fn query_owners(queries: &[SearchQuery]) -> BTreeMap<&str, Vec<&str>> {
    let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for q in queries {
        if q.query.trim().is_empty() {
            continue;
        }
        let channels = owners.entry(q.query.as_str()).or_default();
        if !channels.contains(&q.channel_id.as_str()) {
            channels.push(q.channel_id.as_str());
        }
    }
    owners
}

/// Compile the desired rule set from tracked ids and per-channel queries.
///
/// Ids are deduplicated and sorted before packing. Author rules are
/// untagged; each distinct query value becomes one rule tagged with the
/// channels that own it, joined by [`TAG_SEPARATOR`].
pub fn compile_rules<'a>(
    ids: impl IntoIterator<Item = &'a str>,
    queries: &[SearchQuery],
) -> FeedResult<BTreeSet<FilterRule>> {
    compile_rules_with_limit(ids, queries, MAX_RULE_LENGTH)
}

pub(crate) fn compile_rules_with_limit<'a>(
    ids: impl IntoIterator<Item = &'a str>,
    queries: &[SearchQuery],
    limit: usize,
) -> FeedResult<BTreeSet<FilterRule>> {
    let sorted: Vec<String> = ids
        .into_iter()
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut rules: BTreeSet<FilterRule> = pack_author_rules(&sorted, limit)?
        .into_iter()
        .map(FilterRule::untagged)
        .collect();

    for (value, channels) in query_owners(queries) {
        if value.len() > limit {
            return Err(FeedError::RuleTooLong {
                value: value.to_string(),
                limit,
            });
        }
        let tag = channels.join(TAG_SEPARATOR);
        rules.insert(FilterRule::tagged(value, tag));
    }

    Ok(rules)
}
