//! Typed access to the API's structured collections through the router.

mod client;
mod keys;

pub use client::{AchievementEvent, CachedSummary, DomainClient, SyncAllReport};
pub use keys::ResourceKey;
