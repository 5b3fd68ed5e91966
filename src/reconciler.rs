//! Drains the mutation queue against the network.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::monitor::NetworkMonitor;
use crate::queue::MutationQueue;
use crate::remote::Remote;

/// Observable reconciler state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
  pub syncing: bool,
  /// Percentage of the current pass that succeeded so far (0 when idle)
  pub progress: f64,
  pub last_sync: Option<DateTime<Utc>>,
}

/// Summary of one completed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  /// Queue length when the pass started
  pub total: usize,
  pub succeeded: usize,
  /// Ids left in the queue, in replay order
  pub failed: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  AlreadyRunning,
  Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
  Skipped(SkipReason),
  Completed(SyncReport),
}

/// Replays queued requests in enqueue order, one at a time.
///
/// Idle -> Running -> Idle. Triggers while running, or while offline, are
/// no-ops.
#[derive(Clone)]
pub struct Reconciler {
  queue: MutationQueue,
  remote: Remote,
  monitor: NetworkMonitor,
  running: Arc<AtomicBool>,
  status: Arc<watch::Sender<SyncStatus>>,
}

impl Reconciler {
  pub fn new(queue: MutationQueue, remote: Remote, monitor: NetworkMonitor) -> Self {
    let (status, _) = watch::channel(SyncStatus::default());
    Self {
      queue,
      remote,
      monitor,
      running: Arc::new(AtomicBool::new(false)),
      status: Arc::new(status),
    }
  }

  /// Current status snapshot.
  pub fn status(&self) -> SyncStatus {
    self.status.borrow().clone()
  }

  /// Receiver notified on every status change.
  pub fn watch(&self) -> watch::Receiver<SyncStatus> {
    self.status.subscribe()
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  /// Run one reconciliation pass.
  ///
  /// Each entry is replayed strictly in order. Successes are removed and
  /// advance progress to `succeeded / total * 100`; failures stay queued with
  /// their retry count bumped and the pass moves on. Store failures abort the
  /// pass and propagate.
  pub async fn run_pass(&self) -> Result<PassOutcome> {
    if !self.monitor.is_online() {
      debug!("Skipping sync pass while offline");
      return Ok(PassOutcome::Skipped(SkipReason::Offline));
    }
    if self
      .running
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("Sync pass already running");
      return Ok(PassOutcome::Skipped(SkipReason::AlreadyRunning));
    }

    let _guard = RunningGuard {
      running: &self.running,
      status: &self.status,
    };
    self.status.send_modify(|s| {
      s.syncing = true;
      s.progress = 0.0;
    });

    let entries = self.queue.list()?;
    let total = entries.len();
    info!(total, "Starting sync pass");

    let mut succeeded = 0;
    let mut failed = Vec::new();

    for entry in &entries {
      match self.remote.deliver(&entry.request).await {
        Ok(_) => {
          self.queue.remove(entry.id)?;
          succeeded += 1;
          let progress = succeeded as f64 / total as f64 * 100.0;
          self.status.send_modify(|s| s.progress = progress);
          debug!(id = entry.id, progress, "Replayed queued request");
        }
        Err(err) => {
          let retries = self.queue.record_failure(entry)?;
          warn!(
            id = entry.id,
            url = %entry.request.url,
            retries,
            error = %err,
            "Replay failed, leaving request queued"
          );
          failed.push(entry.id);
        }
      }
    }

    let finished_at = Utc::now();
    self.status.send_modify(|s| s.last_sync = Some(finished_at));
    info!(total, succeeded, failed = failed.len(), "Sync pass finished");

    Ok(PassOutcome::Completed(SyncReport {
      total,
      succeeded,
      failed,
    }))
  }
}

/// Returns the reconciler to Idle however the pass ends.
struct RunningGuard<'a> {
  running: &'a AtomicBool,
  status: &'a watch::Sender<SyncStatus>,
}

impl Drop for RunningGuard<'_> {
  fn drop(&mut self) {
    self.status.send_modify(|s| {
      s.syncing = false;
      s.progress = 0.0;
    });
    self.running.store(false, Ordering::SeqCst);
  }
}
