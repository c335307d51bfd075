//! Post formatting and destination routing.

use std::collections::BTreeSet;

use futures_util::future::join_all;
use tracing::{debug, error};

use crate::routing::ChannelMap;
use crate::rules::TAG_SEPARATOR;
use crate::sink::MessageSink;
use crate::types::PostEvent;

/// Stand-in when the author's username is not among the expansions.
pub const PLACEHOLDER_USERNAME: &str = "i";

const PERMALINK_BASE: &str = "https://twitter.com";

/// Rendered text plus every channel it goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destinations: BTreeSet<String>,
    pub text: String,
}

fn permalink(username: &str, post_id: &str) -> String {
    format!("{PERMALINK_BASE}/{username}/status/{post_id}")
}

fn username_or_placeholder<'a>(event: &'a PostEvent, user_id: Option<&str>) -> &'a str {
    user_id
        .and_then(|id| event.includes.username(id))
        .unwrap_or(PLACEHOLDER_USERNAME)
}

/// Message text for a post.
///
/// Retweets whose original is included render as
/// `` `@author` retweeted <original permalink> ``; everything else is the
/// post's own permalink.
pub fn format_post(event: &PostEvent) -> String {
    let post = &event.data;
    let author = username_or_placeholder(event, post.author_id.as_deref());

    let retweeted = post
        .referenced_tweets
        .iter()
        .filter(|r| r.is_retweet())
        .find_map(|r| event.includes.post(&r.id));

    match retweeted {
        Some(original) => {
            let original_author = username_or_placeholder(event, original.author_id.as_deref());
            format!(
                "`@{author}` retweeted {}",
                permalink(original_author, &original.id)
            )
        }
        None => permalink(author, &post.id),
    }
}

/// Channels mapped to the author plus every non-empty matching rule tag.
///
/// A tag naming several channels (a query they share) expands to all of them.
pub fn resolve_destinations(event: &PostEvent, channels: &ChannelMap) -> BTreeSet<String> {
    let mut destinations: BTreeSet<String> = event
        .data
        .author_id
        .as_deref()
        .map(|id| channels.channels_for(id).iter().cloned().collect())
        .unwrap_or_default();

    let tags = event
        .matching_rules
        .iter()
        .filter_map(|r| r.tag.as_deref())
        .filter(|tag| !tag.is_empty());
    for tag in tags {
        destinations.extend(
            tag.split(TAG_SEPARATOR)
                .filter(|channel| !channel.is_empty())
                .map(str::to_string),
        );
    }
    destinations
}

pub fn route(event: &PostEvent, channels: &ChannelMap) -> Route {
    Route {
        destinations: resolve_destinations(event, channels),
        text: format_post(event),
    }
}

/// Send a route to all of its destinations concurrently.
///
/// Each failure is logged on its own and never affects the other sends.
/// Returns the number of successful deliveries.
pub async fn dispatch(sink: &dyn MessageSink, route: &Route) -> usize {
    let sends = route.destinations.iter().map(|channel| async move {
        match sink.send_message(channel, &route.text).await {
            Ok(()) => {
                debug!(channel = %channel, "Delivered post");
                true
            }
            Err(e) => {
                error!(channel = %channel, text = %route.text, "Failed to deliver post: {e}");
                false
            }
        }
    });
    join_all(sends).await.into_iter().filter(|ok| *ok).count()
}
