//! Per-call policy choosing between the network, the local cache and the
//! mutation queue.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{OfflineError, Result, StoreError};
use crate::monitor::NetworkMonitor;
use crate::queue::MutationQueue;
use crate::remote::Remote;
use crate::store::schema::{BY_RELATION, CACHE};
use crate::store::LocalStore;
use crate::types::{CacheEntry, DomainRecord, EntityKind, RequestDescriptor};

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Opaque response cache
  Cache,
  /// Structured domain collection
  Domain,
}

/// Result of a routed call, with metadata about its source.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  pub data: T,
  pub source: ResponseSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> Fetched<T> {
  fn network(data: T) -> Self {
    Self {
      data,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  fn domain(data: T) -> Self {
    Self {
      data,
      source: ResponseSource::Domain,
      cached_at: None,
    }
  }

  fn cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: ResponseSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  pub fn is_offline_data(&self) -> bool {
    self.source != ResponseSource::Network
  }
}

/// Single entry point mapping a request to a network call, a cache read or
/// an enqueue.
#[derive(Clone)]
pub struct RequestRouter {
  store: Arc<LocalStore>,
  queue: MutationQueue,
  remote: Remote,
  monitor: NetworkMonitor,
  cache_ttl: Duration,
}

impl RequestRouter {
  pub fn new(
    store: Arc<LocalStore>,
    queue: MutationQueue,
    remote: Remote,
    monitor: NetworkMonitor,
  ) -> Self {
    Self {
      store,
      queue,
      remote,
      monitor,
      cache_ttl: Duration::hours(24),
    }
  }

  /// Set the informational expiry stamped on cache entries.
  pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
    self.set_cache_ttl(cache_ttl);
    self
  }

  pub fn set_cache_ttl(&mut self, cache_ttl: Duration) {
    self.cache_ttl = cache_ttl;
  }

  pub fn store(&self) -> &Arc<LocalStore> {
    &self.store
  }

  pub fn is_online(&self) -> bool {
    self.monitor.is_online()
  }

  /// Read a cache entry, failing with `CacheMiss` when absent.
  pub fn read_cache(&self, key: &str) -> Result<CacheEntry> {
    self
      .lookup_cache(key)?
      .ok_or_else(|| OfflineError::CacheMiss(key.to_string()))
  }

  fn lookup_cache(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
    self.store.get(&CACHE, key)
  }

  /// Store a payload under `key`, replacing any previous entry.
  pub fn write_cache(&self, key: &str, payload: Value) -> Result<CacheEntry, StoreError> {
    let entry = CacheEntry::new(key, payload, self.cache_ttl);
    self.store.put(&CACHE, &entry)?;
    debug!(key, "Cached response");
    Ok(entry)
  }

  /// Route a request.
  ///
  /// Online: network, caching the response under `cache_key`; on failure the
  /// cached entry is returned if one exists. Offline: the cached entry, or
  /// the request is queued and `OfflineUncached` returned.
  pub async fn request(
    &self,
    request: RequestDescriptor,
    cache_key: Option<&str>,
  ) -> Result<Fetched<Value>> {
    if self.is_online() {
      match self.remote.send(&request).await {
        Ok(body) => {
          if let Some(key) = cache_key {
            self.write_cache(key, body.clone())?;
          }
          Ok(Fetched::network(body))
        }
        Err(err) => {
          warn!(url = %request.url, error = %err, "Online request failed");
          match self.cache_fallback(cache_key)? {
            Some(entry) => Ok(Fetched::cache(entry.payload, entry.written_at)),
            None => Err(err.into()),
          }
        }
      }
    } else {
      if let Some(entry) = self.cache_fallback(cache_key)? {
        return Ok(Fetched::cache(entry.payload, entry.written_at));
      }
      Err(self.enqueue_offline(request)?)
    }
  }

  /// Fetch a bulk collection. A network response is cached under `cache_key`
  /// and its items are stored in the kind's domain collection. Fallback
  /// prefers the domain collection (filtered by `relation` when given),
  /// then the cache.
  pub async fn fetch_collection(
    &self,
    kind: EntityKind,
    request: RequestDescriptor,
    cache_key: &str,
    relation: Option<&str>,
  ) -> Result<Fetched<Vec<Value>>> {
    if self.is_online() {
      match self.remote.send(&request).await {
        Ok(body) => {
          self.write_cache(cache_key, body.clone())?;
          let items = extract_items(kind, &body);
          self.save_records(kind, &items)?;
          return Ok(Fetched::network(items));
        }
        Err(err) => {
          warn!(url = %request.url, error = %err, "Collection fetch failed");
          return self
            .collection_fallback(kind, cache_key, relation)?
            .ok_or_else(|| err.into());
        }
      }
    }

    match self.collection_fallback(kind, cache_key, relation)? {
      Some(found) => Ok(found),
      None => Err(self.enqueue_offline(request)?),
    }
  }

  /// Fetch one entity. A network response is cached and upserted into the
  /// kind's collection under `id`. Fallback: cache, then domain collection.
  pub async fn fetch_entity(
    &self,
    kind: EntityKind,
    id: &str,
    request: RequestDescriptor,
    cache_key: &str,
  ) -> Result<Fetched<Value>> {
    if self.is_online() {
      match self.remote.send(&request).await {
        Ok(body) => {
          self.write_cache(cache_key, body.clone())?;
          let record = match kind {
            EntityKind::UserData => Some(DomainRecord::keyed(id, body.clone())),
            _ => DomainRecord::from_payload(kind, body.clone()),
          };
          if let Some(record) = record {
            self.store.put(kind.collection(), &record)?;
          }
          return Ok(Fetched::network(body));
        }
        Err(err) => {
          warn!(url = %request.url, error = %err, "Entity fetch failed");
          return self
            .entity_fallback(kind, id, cache_key)?
            .ok_or_else(|| err.into());
        }
      }
    }

    match self.entity_fallback(kind, id, cache_key)? {
      Some(found) => Ok(found),
      None => Err(self.enqueue_offline(request)?),
    }
  }

  /// Records of `kind` held locally, optionally filtered by relation.
  pub fn local_records(
    &self,
    kind: EntityKind,
    relation: Option<&str>,
  ) -> Result<Vec<DomainRecord>, StoreError> {
    match relation {
      Some(value) => self
        .store
        .get_by_index(kind.collection(), BY_RELATION, value),
      None => self.store.get_all(kind.collection()),
    }
  }

  fn save_records(&self, kind: EntityKind, items: &[Value]) -> Result<(), StoreError> {
    let records: Vec<DomainRecord> = items
      .iter()
      .filter_map(|item| {
        let record = DomainRecord::from_payload(kind, item.clone());
        if record.is_none() {
          warn!(collection = kind.plural(), "Skipping item without id");
        }
        record
      })
      .collect();

    if !records.is_empty() {
      self.store.put_all(kind.collection(), &records)?;
    }
    Ok(())
  }

  fn cache_fallback(&self, cache_key: Option<&str>) -> Result<Option<CacheEntry>, StoreError> {
    let Some(key) = cache_key else {
      return Ok(None);
    };
    let entry = self.lookup_cache(key)?;
    if entry.is_some() {
      info!(key, "Serving cached response");
    }
    Ok(entry)
  }

  fn collection_fallback(
    &self,
    kind: EntityKind,
    cache_key: &str,
    relation: Option<&str>,
  ) -> Result<Option<Fetched<Vec<Value>>>, StoreError> {
    let records = self.local_records(kind, relation)?;
    if !records.is_empty() {
      info!(
        collection = kind.plural(),
        count = records.len(),
        "Serving records from domain collection"
      );
      let items = records.into_iter().map(|r| r.payload).collect();
      return Ok(Some(Fetched::domain(items)));
    }

    Ok(
      self
        .cache_fallback(Some(cache_key))?
        .map(|entry| Fetched::cache(extract_items(kind, &entry.payload), entry.written_at)),
    )
  }

  fn entity_fallback(
    &self,
    kind: EntityKind,
    id: &str,
    cache_key: &str,
  ) -> Result<Option<Fetched<Value>>, StoreError> {
    if let Some(entry) = self.cache_fallback(Some(cache_key))? {
      return Ok(Some(Fetched::cache(entry.payload, entry.written_at)));
    }
    Ok(
      self
        .store
        .get(kind.collection(), id)?
        .map(|record| Fetched::domain(record.payload)),
    )
  }

  fn enqueue_offline(&self, request: RequestDescriptor) -> Result<OfflineError, StoreError> {
    let url = request.url.clone();
    let queued_id = self.queue.enqueue(request)?;
    Ok(OfflineError::OfflineUncached { url, queued_id })
  }
}

/// Items of a bulk response: a bare array, or an array nested under the
/// collection's plural name or `data`.
pub fn extract_items(kind: EntityKind, body: &Value) -> Vec<Value> {
  match body {
    Value::Array(items) => items.clone(),
    Value::Object(map) => map
      .get(kind.plural())
      .or_else(|| map.get("data"))
      .and_then(Value::as_array)
      .cloned()
      .unwrap_or_default(),
    _ => Vec::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::TransportError;
  use crate::test_support::Harness;
  use serde_json::json;

  fn router(harness: &Harness) -> RequestRouter {
    RequestRouter::new(
      harness.store.clone(),
      MutationQueue::new(harness.store.clone()),
      harness.remote.clone(),
      harness.monitor.clone(),
    )
  }

  #[tokio::test]
  async fn test_online_success_caches_response() {
    let harness = Harness::new(true);
    harness
      .transport
      .respond("http://api/stats", 200, json!({"points": 10}));
    let router = router(&harness);

    let fetched = router
      .request(RequestDescriptor::get("http://api/stats"), Some("user_stats"))
      .await
      .unwrap();

    assert_eq!(fetched.source, ResponseSource::Network);
    assert_eq!(router.read_cache("user_stats").unwrap().payload, json!({"points": 10}));
  }

  #[tokio::test]
  async fn test_online_failure_falls_back_to_cache() {
    let harness = Harness::new(true);
    let router = router(&harness);
    router.write_cache("user_stats", json!({"points": 3})).unwrap();
    harness.transport.respond("http://api/stats", 500, Value::Null);

    let fetched = router
      .request(RequestDescriptor::get("http://api/stats"), Some("user_stats"))
      .await
      .unwrap();

    assert_eq!(fetched.source, ResponseSource::Cache);
    assert_eq!(fetched.data, json!({"points": 3}));
    assert!(fetched.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_online_failure_without_cache_propagates() {
    let harness = Harness::new(true);
    harness.transport.fail("http://api/stats");
    let router = router(&harness);

    let err = router
      .request(RequestDescriptor::get("http://api/stats"), Some("user_stats"))
      .await
      .unwrap_err();

    assert!(matches!(err, OfflineError::Transport(TransportError::Network { .. })));
    assert_eq!(MutationQueue::new(harness.store.clone()).len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_offline_cache_hit_never_touches_network() {
    let harness = Harness::new(false);
    let router = router(&harness);
    router.write_cache("user_stats", json!({"points": 1})).unwrap();

    let fetched = router
      .request(RequestDescriptor::get("http://api/stats"), Some("user_stats"))
      .await
      .unwrap();

    assert_eq!(fetched.data, json!({"points": 1}));
    assert!(harness.transport.calls().is_empty());
  }

  #[tokio::test]
  async fn test_offline_miss_enqueues_request_unchanged() {
    let harness = Harness::new(false);
    let router = router(&harness);
    let request = RequestDescriptor::post("http://api/submissions/")
      .with_json(&json!({"answer": 42}))
      .with_header("X-Client", "cli");

    let err = router.request(request.clone(), None).await.unwrap_err();

    match err {
      OfflineError::OfflineUncached { url, queued_id } => {
        assert_eq!(url, "http://api/submissions/");
        assert_eq!(queued_id, 1);
      }
      other => panic!("unexpected error: {:?}", other),
    }
    let queued = MutationQueue::new(harness.store.clone()).list().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].request, request);
  }

  #[tokio::test]
  async fn test_read_cache_miss() {
    let harness = Harness::new(true);
    let err = router(&harness).read_cache("absent").unwrap_err();
    assert!(matches!(err, OfflineError::CacheMiss(key) if key == "absent"));
  }

  #[tokio::test]
  async fn test_collection_fetch_populates_cache_and_domain() {
    let harness = Harness::new(true);
    harness.transport.respond(
      "http://api/topics/?discipline_id=4",
      200,
      json!({"topics": [
        {"id": 1, "discipline_id": 4, "title": "a"},
        {"id": 2, "discipline_id": 4, "title": "b"},
        {"title": "no id"}
      ]}),
    );
    let router = router(&harness);

    let fetched = router
      .fetch_collection(
        EntityKind::Topic,
        RequestDescriptor::get("http://api/topics/?discipline_id=4"),
        "topics_discipline_4",
        Some("4"),
      )
      .await
      .unwrap();

    assert_eq!(fetched.data.len(), 3);
    assert!(router.read_cache("topics_discipline_4").is_ok());
    assert_eq!(router.local_records(EntityKind::Topic, Some("4")).unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_collection_offline_reads_domain_by_relation() {
    let harness = Harness::new(true);
    harness.transport.respond(
      "http://api/topics/",
      200,
      json!([
        {"id": 1, "discipline_id": 4},
        {"id": 2, "discipline_id": 5},
        {"id": 3, "discipline_id": 4}
      ]),
    );
    let router = router(&harness);
    router
      .fetch_collection(
        EntityKind::Topic,
        RequestDescriptor::get("http://api/topics/"),
        "topics",
        None,
      )
      .await
      .unwrap();

    harness.monitor.set_online(false);
    let fetched = router
      .fetch_collection(
        EntityKind::Topic,
        RequestDescriptor::get("http://api/topics/?discipline_id=4"),
        "topics_discipline_4",
        Some("4"),
      )
      .await
      .unwrap();

    assert_eq!(fetched.source, ResponseSource::Domain);
    let ids: Vec<&Value> = fetched.data.iter().map(|t| &t["id"]).collect();
    assert_eq!(ids, vec![&json!(1), &json!(3)]);
  }

  #[tokio::test]
  async fn test_entity_fallback_uses_domain_record() {
    let harness = Harness::new(true);
    harness.transport.respond(
      "http://api/assignments/",
      200,
      json!({"assignments": [{"id": 9, "topic_id": 2, "title": "essay"}]}),
    );
    let router = router(&harness);
    router
      .fetch_collection(
        EntityKind::Assignment,
        RequestDescriptor::get("http://api/assignments/"),
        "assignments",
        None,
      )
      .await
      .unwrap();

    harness.transport.fail("http://api/assignments/9");
    let fetched = router
      .fetch_entity(
        EntityKind::Assignment,
        "9",
        RequestDescriptor::get("http://api/assignments/9"),
        "assignment_9",
      )
      .await
      .unwrap();

    assert_eq!(fetched.source, ResponseSource::Domain);
    assert_eq!(fetched.data["title"], "essay");
  }

  #[test]
  fn test_extract_items_shapes() {
    let kind = EntityKind::Discipline;
    assert_eq!(extract_items(kind, &json!([1, 2])).len(), 2);
    assert_eq!(extract_items(kind, &json!({"disciplines": [1]})).len(), 1);
    assert_eq!(extract_items(kind, &json!({"data": [1, 2, 3]})).len(), 3);
    assert!(extract_items(kind, &json!({"other": [1]})).is_empty());
    assert!(extract_items(kind, &Value::Null).is_empty());
  }
}
