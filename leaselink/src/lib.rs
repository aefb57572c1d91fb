//! LeaseLink — real-time messaging client core for a rental marketplace.
//!
//! This crate is the embeddable conversation engine behind the marketplace
//! inbox: thread listing with batched enrichment, message fetching,
//! optimistic sends with identity-keyed reconciliation, a live change-feed
//! subscriber, per-thread typing presence, and the conversation state
//! machine that ties them together.
//!
//! The hosted backend is reached through two traits
//! ([`backend::MarketplaceApi`] and [`backend::LiveChannels`]) so the core
//! can run against the real service, an in-memory double, or anything in
//! between.

pub mod auth;
pub mod backend;
pub mod config;
pub mod conversation;
pub mod live;
pub mod logging;
pub mod messages;
pub mod send;
pub mod threads;
pub mod timeline;
pub mod typing;
