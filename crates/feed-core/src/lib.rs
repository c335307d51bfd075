//! Stream synchronization and dispatch engine for twitter-monitor
//!
//! This crate owns everything between the configuration snapshot and the
//! messaging sink: compiling filter rules, converging them on the remote
//! filter service, supervising the long-lived stream connection, and
//! routing each received post to its destination channels.

pub mod error;
pub mod router;
pub mod routing;
pub mod rules;
pub mod sink;
pub mod stream;
pub mod supervisor;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use error::{FeedError, FeedResult};
pub use router::{dispatch, format_post, resolve_destinations, route, Route, PLACEHOLDER_USERNAME};
pub use routing::{ChannelMap, RoutingSnapshot, RoutingTable, SearchQuery, SnapshotSource};
pub use rules::{compile_rules, pack_author_rules, MAX_RULE_LENGTH};
pub use sink::MessageSink;
pub use stream::{FeedStream, StreamEvent};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorState};
pub use sync::{synchronize, RuleStore, SyncReport};
pub use types::{
    FilterRule, Includes, MatchingRule, Post, PostEvent, ReferencedPost, RemoteRule, User,
};
