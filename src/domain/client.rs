//! Offline-aware client for the learning API's resources.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use crate::error::{Result, StoreError, TransportError};
use crate::router::RequestRouter;
use crate::store::schema::{CACHE, QUEUE};
use crate::types::{EntityKind, RequestDescriptor};

use super::keys::ResourceKey;

/// Achievement triggers the API accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum AchievementEvent {
  Visit,
  /// `submitted_at` is sent as null when unknown
  Submission {
    assignment_id: String,
    submitted_at: Option<DateTime<Utc>>,
  },
  PerfectScore,
  TopicCompletion {
    topic_id: String,
  },
  HelpfulComment,
}

impl AchievementEvent {
  fn path(&self) -> &'static str {
    match self {
      Self::Visit => "achievements/visit",
      Self::Submission { .. } => "achievements/submission",
      Self::PerfectScore => "achievements/perfect-score",
      Self::TopicCompletion { .. } => "achievements/topic-completion",
      Self::HelpfulComment => "achievements/helpful-comment",
    }
  }

  fn body(&self) -> Option<Value> {
    match self {
      Self::Submission {
        assignment_id,
        submitted_at,
      } => Some(json!({
        "assignment_id": assignment_id,
        "submitted_at": submitted_at.map(|t| t.to_rfc3339()),
      })),
      Self::TopicCompletion { topic_id } => Some(json!({ "topic_id": topic_id })),
      _ => None,
    }
  }
}

/// Outcome of refreshing every bulk collection. `None` marks a collection
/// whose fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAllReport {
  pub disciplines: Option<usize>,
  pub topics: Option<usize>,
  pub assignments: Option<usize>,
  pub achievements: Option<usize>,
  /// Set only when the counts came from the network
  pub synced_at: Option<DateTime<Utc>>,
}

impl SyncAllReport {
  pub fn all_succeeded(&self) -> bool {
    [
      self.disciplines,
      self.topics,
      self.assignments,
      self.achievements,
    ]
    .iter()
    .all(Option::is_some)
  }
}

/// Record counts held locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CachedSummary {
  pub disciplines: usize,
  pub topics: usize,
  pub assignments: usize,
  pub achievements: usize,
  pub user_data: usize,
  pub cache_entries: usize,
  /// Cache entries past their informational expiry (still served)
  pub expired_cache_entries: usize,
  pub pending_changes: usize,
}

/// Typed API access routed through the offline layer.
///
/// Reads populate the cache and domain collections and fall back to them;
/// writes are queued for replay when offline.
#[derive(Clone)]
pub struct DomainClient {
  router: RequestRouter,
  base: Url,
}

impl DomainClient {
  pub fn new(router: RequestRouter, base_url: &str) -> Result<Self, TransportError> {
    let mut base = Url::parse(base_url)
      .map_err(|e| TransportError::InvalidRequest(format!("base URL {}: {}", base_url, e)))?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    Ok(Self { router, base })
  }

  pub fn router(&self) -> &RequestRouter {
    &self.router
  }

  /// Absolute URL for a path relative to the API base.
  pub fn url(&self, path: &str) -> Result<String, TransportError> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map(String::from)
      .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", path, e)))
  }

  fn get(&self, key: &ResourceKey) -> Result<RequestDescriptor> {
    Ok(RequestDescriptor::get(self.url(&key.path())?))
  }

  async fn collection(
    &self,
    kind: EntityKind,
    key: ResourceKey,
    relation: Option<&str>,
  ) -> Result<Vec<Value>> {
    let request = self.get(&key)?;
    let fetched = self
      .router
      .fetch_collection(kind, request, &key.cache_key(), relation)
      .await?;
    Ok(fetched.data)
  }

  async fn entity(&self, kind: EntityKind, id: &str, key: ResourceKey) -> Result<Value> {
    let request = self.get(&key)?;
    let fetched = self
      .router
      .fetch_entity(kind, id, request, &key.cache_key())
      .await?;
    Ok(fetched.data)
  }

  async fn cached(&self, key: ResourceKey) -> Result<Value> {
    let request = self.get(&key)?;
    let fetched = self.router.request(request, Some(&key.cache_key())).await?;
    Ok(fetched.data)
  }

  async fn write(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value> {
    let mut request = RequestDescriptor::new(method, self.url(path)?);
    if let Some(body) = body {
      request = request.with_json(body);
    }
    let fetched = self.router.request(request, None).await?;
    Ok(fetched.data)
  }

  pub async fn disciplines(&self) -> Result<Vec<Value>> {
    self
      .collection(EntityKind::Discipline, ResourceKey::Disciplines, None)
      .await
  }

  pub async fn discipline(&self, id: &str) -> Result<Value> {
    self
      .entity(
        EntityKind::Discipline,
        id,
        ResourceKey::Discipline { id: id.to_string() },
      )
      .await
  }

  /// Topics, optionally only those of one discipline.
  pub async fn topics(&self, discipline_id: Option<&str>) -> Result<Vec<Value>> {
    let key = ResourceKey::Topics {
      discipline: discipline_id.map(String::from),
    };
    self
      .collection(EntityKind::Topic, key, discipline_id)
      .await
  }

  pub async fn topic(&self, id: &str) -> Result<Value> {
    self
      .entity(EntityKind::Topic, id, ResourceKey::Topic { id: id.to_string() })
      .await
  }

  pub async fn assignments(&self) -> Result<Vec<Value>> {
    self
      .collection(EntityKind::Assignment, ResourceKey::Assignments, None)
      .await
  }

  pub async fn assignment(&self, id: &str) -> Result<Value> {
    self
      .entity(
        EntityKind::Assignment,
        id,
        ResourceKey::Assignment { id: id.to_string() },
      )
      .await
  }

  pub async fn assignments_by_topic(&self, topic_id: &str) -> Result<Vec<Value>> {
    let key = ResourceKey::AssignmentsByTopic {
      topic: topic_id.to_string(),
    };
    self
      .collection(EntityKind::Assignment, key, Some(topic_id))
      .await
  }

  pub async fn achievements(&self) -> Result<Vec<Value>> {
    self
      .collection(EntityKind::Achievement, ResourceKey::Achievements, None)
      .await
  }

  pub async fn user_stats(&self) -> Result<Value> {
    let key = ResourceKey::UserStats;
    let id = key.cache_key();
    self.entity(EntityKind::UserData, &id, key).await
  }

  pub async fn my_submissions(&self) -> Result<Value> {
    let key = ResourceKey::MySubmissions;
    let id = key.cache_key();
    self.entity(EntityKind::UserData, &id, key).await
  }

  pub async fn unviewed_achievements(&self) -> Result<Value> {
    self.cached(ResourceKey::UnviewedAchievements).await
  }

  pub async fn create_submission(&self, body: &Value) -> Result<Value> {
    self.write("POST", "submissions/", Some(body)).await
  }

  pub async fn update_submission(&self, id: &str, body: &Value) -> Result<Value> {
    self
      .write("PUT", &format!("submissions/{}", id), Some(body))
      .await
  }

  pub async fn record_event(&self, event: AchievementEvent) -> Result<Value> {
    let body = event.body();
    self.write("POST", event.path(), body.as_ref()).await
  }

  pub async fn mark_achievement_viewed(&self, achievement_type: &str) -> Result<Value> {
    let body = json!({ "achievement_type": achievement_type });
    self
      .write("POST", "achievements/mark-viewed", Some(&body))
      .await
  }

  pub async fn mark_all_achievements_viewed(&self) -> Result<Value> {
    self.write("POST", "achievements/mark-all-viewed", None).await
  }

  /// Refresh the four bulk collections concurrently.
  ///
  /// Offline, nothing is requested (so nothing is queued) and the report
  /// carries what the domain collections already hold.
  pub async fn sync_all(&self) -> Result<SyncAllReport, StoreError> {
    if !self.router.is_online() {
      let local = |kind: EntityKind| self.router.local_records(kind, None).map(|r| Some(r.len()));
      return Ok(SyncAllReport {
        disciplines: local(EntityKind::Discipline)?,
        topics: local(EntityKind::Topic)?,
        assignments: local(EntityKind::Assignment)?,
        achievements: local(EntityKind::Achievement)?,
        synced_at: None,
      });
    }

    let (disciplines, topics, assignments, achievements) = futures::join!(
      self.disciplines(),
      self.topics(None),
      self.assignments(),
      self.achievements(),
    );

    let report = SyncAllReport {
      disciplines: counted("disciplines", disciplines),
      topics: counted("topics", topics),
      assignments: counted("assignments", assignments),
      achievements: counted("achievements", achievements),
      synced_at: Some(Utc::now()),
    };
    info!(?report, "Collections synced");
    Ok(report)
  }

  /// Warm the local collections. Failures are logged, never returned.
  pub async fn preload(&self) {
    match self.sync_all().await {
      Ok(report) if report.all_succeeded() => info!("Preloaded all collections"),
      Ok(report) => warn!(?report, "Preload incomplete"),
      Err(e) => warn!(error = %e, "Preload failed"),
    }
  }

  /// Counts of locally held records and pending writes.
  pub fn cached_summary(&self) -> Result<CachedSummary, StoreError> {
    let store = self.router.store();
    let now = Utc::now();
    let expired = store
      .get_all(&CACHE)?
      .iter()
      .filter(|entry| entry.is_expired_at(now))
      .count();
    Ok(CachedSummary {
      disciplines: store.count(EntityKind::Discipline.collection())?,
      topics: store.count(EntityKind::Topic.collection())?,
      assignments: store.count(EntityKind::Assignment.collection())?,
      achievements: store.count(EntityKind::Achievement.collection())?,
      user_data: store.count(EntityKind::UserData.collection())?,
      cache_entries: store.count(&CACHE)?,
      expired_cache_entries: expired,
      pending_changes: store.count(&QUEUE)?,
    })
  }
}

fn counted(name: &str, result: Result<Vec<Value>>) -> Option<usize> {
  match result {
    Ok(items) => Some(items.len()),
    Err(e) => {
      warn!(collection = name, error = %e, "Collection sync failed");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::OfflineError;
  use chrono::Duration;
  use crate::queue::MutationQueue;
  use crate::test_support::Harness;

  fn client(harness: &Harness) -> DomainClient {
    let router = RequestRouter::new(
      harness.store.clone(),
      MutationQueue::new(harness.store.clone()),
      harness.remote.clone(),
      harness.monitor.clone(),
    );
    DomainClient::new(router, "http://api/v1").unwrap()
  }

  fn script_collections(harness: &Harness) {
    let t = &harness.transport;
    t.respond(
      "http://api/v1/disciplines/",
      200,
      json!([{"id": 1}, {"id": 2}]),
    );
    t.respond(
      "http://api/v1/topics/",
      200,
      json!({"topics": [{"id": 10, "discipline_id": 1}]}),
    );
    t.respond(
      "http://api/v1/assignments/",
      200,
      json!({"data": [{"id": 100, "topic_id": 10}, {"id": 101, "topic_id": 10}, {"id": 102, "topic_id": 11}]}),
    );
    t.respond("http://api/v1/achievements/", 500, Value::Null);
  }

  #[test]
  fn test_url_joins_relative_to_base() {
    let harness = Harness::new(true);
    let client = client(&harness);
    assert_eq!(
      client.url("topics/?discipline_id=3").unwrap(),
      "http://api/v1/topics/?discipline_id=3"
    );
    assert_eq!(
      client.url("/achievements/visit").unwrap(),
      "http://api/v1/achievements/visit"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    let harness = Harness::new(true);
    let router = RequestRouter::new(
      harness.store.clone(),
      MutationQueue::new(harness.store.clone()),
      harness.remote.clone(),
      harness.monitor.clone(),
    );
    assert!(DomainClient::new(router, "not a url").is_err());
  }

  #[tokio::test]
  async fn test_sync_all_reports_per_collection() {
    let harness = Harness::new(true);
    script_collections(&harness);
    let client = client(&harness);

    let report = client.sync_all().await.unwrap();

    assert_eq!(report.disciplines, Some(2));
    assert_eq!(report.topics, Some(1));
    assert_eq!(report.assignments, Some(3));
    assert_eq!(report.achievements, None);
    assert!(!report.all_succeeded());
    assert!(report.synced_at.is_some());

    let summary = client.cached_summary().unwrap();
    assert_eq!(summary.disciplines, 2);
    assert_eq!(summary.assignments, 3);
    assert_eq!(summary.cache_entries, 3);
    assert_eq!(summary.pending_changes, 0);
  }

  #[tokio::test]
  async fn test_sync_all_offline_reports_local_counts_without_queueing() {
    let harness = Harness::new(true);
    script_collections(&harness);
    let client = client(&harness);
    client.sync_all().await.unwrap();

    harness.monitor.set_online(false);
    let report = client.sync_all().await.unwrap();

    assert_eq!(report.disciplines, Some(2));
    assert_eq!(report.achievements, Some(0));
    assert!(report.synced_at.is_none());
    assert_eq!(client.cached_summary().unwrap().pending_changes, 0);
  }

  #[tokio::test]
  async fn test_assignments_by_topic_offline_filter_domain() {
    let harness = Harness::new(true);
    script_collections(&harness);
    let client = client(&harness);
    client.assignments().await.unwrap();

    harness.monitor.set_online(false);
    let items = client.assignments_by_topic("10").await.unwrap();

    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|a| a["topic_id"] == 10));
  }

  #[tokio::test]
  async fn test_user_stats_stored_as_user_data() {
    let harness = Harness::new(true);
    harness
      .transport
      .respond("http://api/v1/achievements/stats", 200, json!({"points": 40}));
    let client = client(&harness);

    client.user_stats().await.unwrap();
    harness.transport.fail("http://api/v1/achievements/stats");
    let stats = client.user_stats().await.unwrap();

    assert_eq!(stats, json!({"points": 40}));
    assert_eq!(client.cached_summary().unwrap().user_data, 1);
  }

  #[tokio::test]
  async fn test_offline_event_is_queued_with_body() {
    let harness = Harness::new(false);
    let client = client(&harness);

    let err = client
      .record_event(AchievementEvent::TopicCompletion {
        topic_id: "7".into(),
      })
      .await
      .unwrap_err();

    assert!(matches!(err, OfflineError::OfflineUncached { .. }));
    let queued = MutationQueue::new(harness.store.clone()).list().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].request.method, "POST");
    assert_eq!(
      queued[0].request.url,
      "http://api/v1/achievements/topic-completion"
    );
    let body: Value = serde_json::from_str(queued[0].request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"topic_id": "7"}));
  }

  #[tokio::test]
  async fn test_submission_event_body() {
    let harness = Harness::new(false);
    let client = client(&harness);
    let at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
      .unwrap()
      .with_timezone(&Utc);

    for submitted_at in [Some(at), None] {
      client
        .record_event(AchievementEvent::Submission {
          assignment_id: "12".into(),
          submitted_at,
        })
        .await
        .unwrap_err();
    }

    let queued = MutationQueue::new(harness.store.clone()).list().unwrap();
    let bodies: Vec<Value> = queued
      .iter()
      .map(|m| serde_json::from_str(m.request.body.as_deref().unwrap()).unwrap())
      .collect();
    assert_eq!(queued[0].request.url, "http://api/v1/achievements/submission");
    assert_eq!(
      bodies,
      vec![
        json!({"assignment_id": "12", "submitted_at": "2024-03-01T10:00:00+00:00"}),
        json!({"assignment_id": "12", "submitted_at": null}),
      ]
    );
  }

  #[tokio::test]
  async fn test_online_write_is_not_cached() {
    let harness = Harness::new(true);
    harness
      .transport
      .respond("http://api/v1/submissions/5", 200, json!({"id": 5}));
    let client = client(&harness);

    client
      .update_submission("5", &json!({"answer": "b"}))
      .await
      .unwrap();

    assert_eq!(client.cached_summary().unwrap().cache_entries, 0);
    assert_eq!(harness.transport.calls()[0].method, "PUT");
  }

  #[test]
  fn test_summary_counts_expired_entries() {
    let harness = Harness::new(true);
    let fresh = client(&harness);
    let stale = DomainClient::new(
      fresh.router().clone().with_cache_ttl(Duration::zero()),
      "http://api/v1",
    )
    .unwrap();

    fresh.router().write_cache("a", json!(1)).unwrap();
    stale.router().write_cache("b", json!(2)).unwrap();

    let summary = fresh.cached_summary().unwrap();
    assert_eq!(summary.cache_entries, 2);
    assert_eq!(summary.expired_cache_entries, 1);
  }

  #[tokio::test]
  async fn test_preload_swallows_failures() {
    let harness = Harness::new(true);
    harness.transport.set_unreachable(true);
    let client = client(&harness);

    client.preload().await;

    assert_eq!(client.cached_summary().unwrap(), CachedSummary::default());
  }
}
