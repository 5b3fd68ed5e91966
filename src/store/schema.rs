//! Collections, their secondary indices, and the backing SQLite schema.

use crate::types::{CacheEntry, DomainRecord, EntityKind, QueuedMutation};

use super::traits::{Collection, Key, Record};

/// Index on queue enqueue time
pub const BY_TIMESTAMP: &str = "by_ts";
/// Index on a domain record's parent relation
pub const BY_RELATION: &str = "by_relation";
/// Index on a domain record's update time
pub const BY_UPDATED: &str = "by_updated";

pub static CACHE: Collection<CacheEntry> = Collection::new("cache", &[]);
pub static QUEUE: Collection<QueuedMutation> = Collection::new("queue", &[BY_TIMESTAMP]);

pub static DISCIPLINES: Collection<DomainRecord> = Collection::new("disciplines", &[BY_UPDATED]);
pub static TOPICS: Collection<DomainRecord> =
  Collection::new("topics", &[BY_RELATION, BY_UPDATED]);
pub static ASSIGNMENTS: Collection<DomainRecord> =
  Collection::new("assignments", &[BY_RELATION, BY_UPDATED]);
pub static ACHIEVEMENTS: Collection<DomainRecord> =
  Collection::new("achievements", &[BY_RELATION, BY_UPDATED]);
pub static USER_DATA: Collection<DomainRecord> = Collection::new("userData", &[BY_UPDATED]);

impl EntityKind {
  /// The structured collection records of this kind are stored in.
  pub fn collection(&self) -> &'static Collection<DomainRecord> {
    match self {
      EntityKind::Discipline => &DISCIPLINES,
      EntityKind::Topic => &TOPICS,
      EntityKind::Assignment => &ASSIGNMENTS,
      EntityKind::Achievement => &ACHIEVEMENTS,
      EntityKind::UserData => &USER_DATA,
    }
  }
}

/// Schema for the record and index tables.
///
/// `record_key` and `index_value` carry no type affinity so integer keys
/// keep integer ordering.
pub(super) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    record_key NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (collection, record_key)
);

CREATE TABLE IF NOT EXISTS record_index (
    collection TEXT NOT NULL,
    index_name TEXT NOT NULL,
    index_value NOT NULL,
    record_key NOT NULL,
    PRIMARY KEY (collection, index_name, record_key)
);

CREATE INDEX IF NOT EXISTS idx_record_index_lookup
    ON record_index(collection, index_name, index_value);

-- Never reset by clear, so ids are not reused
CREATE TABLE IF NOT EXISTS sequences (
    collection TEXT PRIMARY KEY,
    next_id INTEGER NOT NULL
);
"#;

// ============================================================================
// Record implementations
// ============================================================================

impl Record for CacheEntry {
  fn key(&self) -> Key {
    Key::from(&self.key)
  }
}

impl Record for QueuedMutation {
  fn key(&self) -> Key {
    Key::from(self.id)
  }

  fn index_key(&self, index: &str) -> Option<Key> {
    match index {
      BY_TIMESTAMP => Some(Key::Int(self.enqueued_at.timestamp_millis())),
      _ => None,
    }
  }
}

impl Record for DomainRecord {
  fn key(&self) -> Key {
    Key::from(&self.id)
  }

  fn index_key(&self, index: &str) -> Option<Key> {
    match index {
      BY_RELATION => self.relation.as_ref().map(Key::from),
      BY_UPDATED => self.updated_at.as_ref().map(Key::from),
      _ => None,
    }
  }
}
