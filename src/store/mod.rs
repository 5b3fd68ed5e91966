//! Durable, transactional, indexed local storage.
//!
//! This module provides a generic record store that:
//! - Keeps independent collections, each keyed by a primary key
//! - Maintains declared secondary indices alongside every write
//! - Assigns monotonically increasing ids for auto-increment collections
//! - Runs each call in its own SQLite transaction (no cross-collection atomicity)

pub mod schema;
mod sqlite;
mod traits;

pub use sqlite::{default_path, LocalStore};
pub use traits::{Collection, Key, Record};
