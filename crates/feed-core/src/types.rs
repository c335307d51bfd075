//! Filter rules and the stream's post payload.

use serde::{Deserialize, Serialize};

// ── Filter rules ─────────────────────────────────────────────────

/// A server-side filter rule. Equality is by `(value, tag)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterRule {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl FilterRule {
    /// Untagged rule, routed through the identifier map.
    pub fn untagged(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tag: None,
        }
    }

    /// Rule whose matches are delivered straight to `channel_id`.
    pub fn tagged(value: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tag: Some(channel_id.into()),
        }
    }
}

/// A rule as installed on the remote filter service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteRule {
    pub id: String,
    #[serde(flatten)]
    pub rule: FilterRule,
}

// ── Stream payload ───────────────────────────────────────────────

/// One post delivered by the filtered stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub referenced_tweets: Vec<ReferencedPost>,
}

/// Reference from a post to another post (retweet, quote, reply).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReferencedPost {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ReferencedPost {
    pub fn is_retweet(&self) -> bool {
        self.kind == "retweeted"
    }
}

/// Expanded user object; only the username is requested.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Expansions attached to a stream event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub tweets: Vec<Post>,
}

impl Includes {
    pub fn username(&self, user_id: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.username.as_str())
            .filter(|name| !name.is_empty())
    }

    pub fn post(&self, post_id: &str) -> Option<&Post> {
        self.tweets.iter().find(|t| t.id == post_id)
    }
}

/// An installed rule that selected the post.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchingRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tag: Option<String>,
}

/// A full post event as it arrives on the stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostEvent {
    pub data: Post,
    #[serde(default)]
    pub includes: Includes,
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
}
