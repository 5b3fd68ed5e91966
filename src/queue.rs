//! Durable FIFO of deferred writes.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::schema::QUEUE;
use crate::store::LocalStore;
use crate::types::{QueuedMutation, RequestDescriptor};

/// Ordered log of pending writes, persisted in the local store.
///
/// Entries are never deduplicated: two offline writes to the same resource
/// are two entries, replayed in the order they were enqueued.
#[derive(Clone)]
pub struct MutationQueue {
  store: Arc<LocalStore>,
}

impl MutationQueue {
  pub fn new(store: Arc<LocalStore>) -> Self {
    Self { store }
  }

  /// Append a request. Touches only the local store.
  pub fn enqueue(&self, request: RequestDescriptor) -> Result<u64, StoreError> {
    let entry = self.store.add(&QUEUE, |id| QueuedMutation {
      id,
      request,
      enqueued_at: Utc::now(),
      retry_count: 0,
    })?;

    info!(
      id = entry.id,
      method = %entry.request.method,
      url = %entry.request.url,
      "Queued request for replay"
    );
    Ok(entry.id)
  }

  /// All pending entries, oldest first.
  pub fn list(&self) -> Result<Vec<QueuedMutation>, StoreError> {
    self.store.get_all(&QUEUE)
  }

  /// Remove an entry after its replay was confirmed.
  pub fn remove(&self, id: u64) -> Result<bool, StoreError> {
    let removed = self.store.delete(&QUEUE, id)?;
    debug!(id, removed, "Removed queued request");
    Ok(removed)
  }

  /// Record one more failed replay of `entry`. No cap is applied.
  pub fn record_failure(&self, entry: &QueuedMutation) -> Result<u32, StoreError> {
    let updated = QueuedMutation {
      retry_count: entry.retry_count.saturating_add(1),
      ..entry.clone()
    };
    self.store.put(&QUEUE, &updated)?;
    Ok(updated.retry_count)
  }

  /// Number of pending entries; the authoritative pending-changes count.
  pub fn len(&self) -> Result<usize, StoreError> {
    self.store.count(&QUEUE)
  }

  pub fn is_empty(&self) -> Result<bool, StoreError> {
    Ok(self.len()? == 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn queue() -> MutationQueue {
    MutationQueue::new(Arc::new(LocalStore::open_in_memory().unwrap()))
  }

  fn urls(queue: &MutationQueue) -> Vec<String> {
    queue
      .list()
      .unwrap()
      .into_iter()
      .map(|m| m.request.url)
      .collect()
  }

  #[test]
  fn test_list_preserves_enqueue_order() {
    let queue = queue();
    for url in ["/c", "/a", "/b"] {
      queue.enqueue(RequestDescriptor::post(url)).unwrap();
    }

    assert_eq!(urls(&queue), vec!["/c", "/a", "/b"]);
    assert_eq!(queue.len().unwrap(), 3);
  }

  #[test]
  fn test_remove_deletes_exactly_one_and_keeps_order() {
    let queue = queue();
    let ids: Vec<u64> = ["/1", "/2", "/3", "/4"]
      .iter()
      .map(|u| queue.enqueue(RequestDescriptor::post(*u)).unwrap())
      .collect();

    assert!(queue.remove(ids[1]).unwrap());
    assert!(!queue.remove(ids[1]).unwrap());

    assert_eq!(urls(&queue), vec!["/1", "/3", "/4"]);
  }

  #[test]
  fn test_duplicate_writes_are_not_merged() {
    let queue = queue();
    let req = RequestDescriptor::put("/submissions/9").with_header("X-Req", "1");
    queue.enqueue(req.clone()).unwrap();
    queue.enqueue(req).unwrap();

    assert_eq!(queue.len().unwrap(), 2);
  }

  #[test]
  fn test_record_failure_increments_in_place() {
    let queue = queue();
    queue.enqueue(RequestDescriptor::post("/a")).unwrap();
    queue.enqueue(RequestDescriptor::post("/b")).unwrap();

    let first = queue.list().unwrap().remove(0);
    assert_eq!(queue.record_failure(&first).unwrap(), 1);
    let first = queue.list().unwrap().remove(0);
    assert_eq!(queue.record_failure(&first).unwrap(), 2);

    let entries = queue.list().unwrap();
    assert_eq!(entries[0].request.url, "/a");
    assert_eq!(entries[0].retry_count, 2);
    assert_eq!(entries[1].retry_count, 0);
  }
}
