//! Data model shared by the store, queue, router and reconciler.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Request shape used by the router and the mutation queue.
/// Replay reissues it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
  pub url: String,
  pub method: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub body: Option<String>,
}

impl RequestDescriptor {
  pub fn new(method: &str, url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: method.to_uppercase(),
      headers: BTreeMap::new(),
      body: None,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new("GET", url)
  }

  pub fn post(url: impl Into<String>) -> Self {
    Self::new("POST", url)
  }

  pub fn put(url: impl Into<String>) -> Self {
    Self::new("PUT", url)
  }

  /// Attach a JSON body.
  pub fn with_json(mut self, body: &Value) -> Self {
    self.body = Some(body.to_string());
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }
}

/// Opaque cached response keyed by logical request identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub payload: Value,
  pub written_at: DateTime<Utc>,
  /// Informational only; nothing evicts on expiry
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(key: impl Into<String>, payload: Value, ttl: Duration) -> Self {
    let written_at = Utc::now();
    Self {
      key: key.into(),
      payload,
      written_at,
      expires_at: written_at
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// A deferred write waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
  pub id: u64,
  #[serde(flatten)]
  pub request: RequestDescriptor,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
}

/// Entity kinds with their own structured collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
  Discipline,
  Topic,
  Assignment,
  Achievement,
  UserData,
}

impl EntityKind {
  pub const ALL: [EntityKind; 5] = [
    EntityKind::Discipline,
    EntityKind::Topic,
    EntityKind::Assignment,
    EntityKind::Achievement,
    EntityKind::UserData,
  ];

  /// Name of the wrapper field bulk responses may nest their array under.
  pub fn plural(&self) -> &'static str {
    match self {
      EntityKind::Discipline => "disciplines",
      EntityKind::Topic => "topics",
      EntityKind::Assignment => "assignments",
      EntityKind::Achievement => "achievements",
      EntityKind::UserData => "userData",
    }
  }

  /// Payload field holding the parent relation, if this kind has one.
  pub fn relation_field(&self) -> Option<&'static str> {
    match self {
      EntityKind::Topic => Some("discipline_id"),
      EntityKind::Assignment => Some("topic_id"),
      EntityKind::Achievement => Some("user_id"),
      EntityKind::Discipline | EntityKind::UserData => None,
    }
  }
}

/// Structured record in a domain collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
  pub id: String,
  pub payload: Value,
  pub relation: Option<String>,
  pub updated_at: Option<String>,
}

impl DomainRecord {
  /// Build a record from an API item, reading id, relation and update time
  /// from the payload. Returns None when the item has no usable id.
  pub fn from_payload(kind: EntityKind, payload: Value) -> Option<Self> {
    let id = scalar_to_string(payload.get("id")?)?;
    let relation = kind
      .relation_field()
      .and_then(|field| payload.get(field))
      .and_then(scalar_to_string);
    let updated_at = payload
      .get("updated_at")
      .and_then(Value::as_str)
      .map(String::from);

    Some(Self {
      id,
      payload,
      relation,
      updated_at,
    })
  }

  /// A user-scoped datum stored under a logical key.
  pub fn keyed(key: impl Into<String>, payload: Value) -> Self {
    Self {
      id: key.into(),
      payload,
      relation: None,
      updated_at: Some(Utc::now().to_rfc3339()),
    }
  }
}

fn scalar_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_domain_record_reads_relation_and_numeric_id() {
    let record = DomainRecord::from_payload(
      EntityKind::Topic,
      json!({"id": 7, "discipline_id": 3, "updated_at": "2024-01-01T00:00:00Z"}),
    )
    .unwrap();

    assert_eq!(record.id, "7");
    assert_eq!(record.relation.as_deref(), Some("3"));
    assert_eq!(record.updated_at.as_deref(), Some("2024-01-01T00:00:00Z"));
  }

  #[test]
  fn test_domain_record_without_id_is_rejected() {
    assert!(DomainRecord::from_payload(EntityKind::Discipline, json!({"name": "x"})).is_none());
  }

  #[test]
  fn test_cache_entry_expiry_is_informational() {
    let entry = CacheEntry::new("k", json!(1), Duration::hours(24));
    assert!(!entry.is_expired_at(entry.written_at));
    assert!(entry.is_expired_at(entry.written_at + Duration::hours(25)));
  }

  #[test]
  fn test_cache_entry_expiry_saturates_instead_of_overflowing() {
    let ttl = Duration::try_days(100_000_000).unwrap();
    let entry = CacheEntry::new("k", json!(1), ttl);
    assert_eq!(entry.expires_at, DateTime::<Utc>::MAX_UTC);
  }

  #[test]
  fn test_descriptor_uppercases_method() {
    let req = RequestDescriptor::new("patch", "http://x/a");
    assert_eq!(req.method, "PATCH");
  }
}
