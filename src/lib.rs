//! Twitter filtered-stream → Discord relay.
//!
//! The stream supervision, rule sync and routing live in `feed-core`; this
//! crate supplies the configuration and the HTTP adapters behind its traits.

pub mod api;
pub mod channels;
pub mod config;
pub mod credentials;
pub mod discord;
pub mod follow_list;
pub mod twitter;
