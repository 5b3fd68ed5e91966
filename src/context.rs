//! Composition façade over the monitor, queue, router and reconciler.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Result, StoreError};
use crate::monitor::{ListenerHandle, NetworkMonitor, Transition};
use crate::queue::MutationQueue;
use crate::reconciler::{PassOutcome, Reconciler, SyncStatus};
use crate::remote::Remote;
use crate::router::RequestRouter;
use crate::store::LocalStore;
use crate::types::RequestDescriptor;

/// Everything an external caller can observe about offline state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityState {
  pub online: bool,
  pub syncing: bool,
  /// Queue length; the authoritative pending count
  pub pending_changes: usize,
  pub sync_progress: f64,
  pub last_sync: Option<DateTime<Utc>>,
}

/// One observable unit for offline-aware callers.
///
/// `start` subscribes to the monitor so that coming back online triggers a
/// sync pass; `dispose` (or drop) unregisters that subscription.
pub struct OfflineContext {
  store: Arc<LocalStore>,
  monitor: NetworkMonitor,
  queue: MutationQueue,
  router: RequestRouter,
  reconciler: Reconciler,
  listener: Option<(ListenerHandle, JoinHandle<()>)>,
}

impl OfflineContext {
  pub fn new(store: Arc<LocalStore>, remote: Remote, monitor: NetworkMonitor) -> Self {
    let queue = MutationQueue::new(store.clone());
    let router = RequestRouter::new(
      store.clone(),
      queue.clone(),
      remote.clone(),
      monitor.clone(),
    );
    let reconciler = Reconciler::new(queue.clone(), remote, monitor.clone());

    Self {
      store,
      monitor,
      queue,
      router,
      reconciler,
      listener: None,
    }
  }

  /// Set the informational expiry for cache entries written through this
  /// context.
  pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
    self.router.set_cache_ttl(ttl);
    self
  }

  /// Begin listening for connectivity transitions. Must run inside a tokio
  /// runtime. Calling it twice keeps the first listener.
  pub fn start(&mut self) {
    if self.listener.is_some() {
      return;
    }

    let mut subscription = self.monitor.subscribe();
    let handle = subscription.handle();
    let reconciler = self.reconciler.clone();

    let task = tokio::spawn(async move {
      while let Some(transition) = subscription.recv().await {
        match transition {
          Transition::CameOnline => match reconciler.run_pass().await {
            Ok(PassOutcome::Completed(report)) => {
              info!(
                succeeded = report.succeeded,
                failed = report.failed.len(),
                "Synced after reconnect"
              );
            }
            Ok(PassOutcome::Skipped(reason)) => debug!(?reason, "Reconnect sync skipped"),
            Err(e) => error!(error = %e, "Reconnect sync failed"),
          },
          Transition::WentOffline => debug!("Working offline"),
        }
      }
    });

    self.listener = Some((handle, task));
  }

  /// Stop listening. The listener is unregistered before this returns; a
  /// pass already in flight runs to completion.
  pub fn dispose(&mut self) {
    if let Some((handle, _task)) = self.listener.take() {
      handle.unregister();
    }
  }

  pub fn is_started(&self) -> bool {
    self.listener.is_some()
  }

  /// Snapshot of connectivity, queue and sync state.
  pub fn state(&self) -> Result<ConnectivityState, StoreError> {
    let sync = self.reconciler.status();
    Ok(ConnectivityState {
      online: self.monitor.is_online(),
      syncing: sync.syncing,
      pending_changes: self.queue.len()?,
      sync_progress: sync.progress,
      last_sync: sync.last_sync,
    })
  }

  /// Receiver notified whenever sync status changes.
  pub fn watch_sync(&self) -> watch::Receiver<SyncStatus> {
    self.reconciler.watch()
  }

  pub fn monitor(&self) -> &NetworkMonitor {
    &self.monitor
  }

  pub fn router(&self) -> &RequestRouter {
    &self.router
  }

  pub fn queue(&self) -> &MutationQueue {
    &self.queue
  }

  /// Run a sync pass now. A no-op while offline or already syncing.
  pub async fn sync_data(&self) -> Result<PassOutcome> {
    self.reconciler.run_pass().await
  }

  pub fn cache_data(&self, key: &str, payload: Value) -> Result<(), StoreError> {
    self.router.write_cache(key, payload).map(|_| ())
  }

  pub fn get_cached_data(&self, key: &str) -> Result<Option<Value>, StoreError> {
    Ok(self.store.get(&crate::store::schema::CACHE, key)?.map(|e| e.payload))
  }

  /// Queue a request for the next sync pass.
  pub fn queue_request(&self, request: RequestDescriptor) -> Result<u64, StoreError> {
    self.queue.enqueue(request)
  }

  /// Route a request using its URL as the cache key.
  pub async fn offline_request(&self, request: RequestDescriptor) -> Result<Value> {
    let cache_key = request.url.clone();
    let fetched = self.router.request(request, Some(&cache_key)).await?;
    Ok(fetched.data)
  }

  /// Clear domain collections and cache; pending writes are kept.
  pub fn reset(&self) -> Result<(), StoreError> {
    self.store.reset()
  }
}

impl Drop for OfflineContext {
  fn drop(&mut self) {
    self.dispose();
  }
}
