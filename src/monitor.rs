//! Connectivity state with explicit subscribe/unsubscribe lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::remote::Remote;

/// Edge-triggered connectivity change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  CameOnline,
  WentOffline,
}

type Listeners = Mutex<HashMap<u64, mpsc::UnboundedSender<Transition>>>;

struct Inner {
  online: AtomicBool,
  next_listener: AtomicU64,
  listeners: Listeners,
}

impl Inner {
  fn listeners(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<Transition>>> {
    // The map stays consistent even if a holder panicked
    self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Source of truth for connectivity. Cheap to clone; clones share state.
///
/// The underlying signal (probe, platform event, test) calls
/// [`NetworkMonitor::set_online`]; subscribers only hear actual changes.
#[derive(Clone)]
pub struct NetworkMonitor {
  inner: Arc<Inner>,
}

impl NetworkMonitor {
  pub fn new(online: bool) -> Self {
    Self {
      inner: Arc::new(Inner {
        online: AtomicBool::new(online),
        next_listener: AtomicU64::new(1),
        listeners: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Latest known connectivity.
  pub fn is_online(&self) -> bool {
    self.inner.online.load(Ordering::SeqCst)
  }

  /// Feed a connectivity observation. Returns the transition if the state
  /// changed; repeated identical observations are ignored. No debouncing.
  pub fn set_online(&self, online: bool) -> Option<Transition> {
    // Held across the swap so listeners see transitions in state order
    let mut listeners = self.inner.listeners();
    let previous = self.inner.online.swap(online, Ordering::SeqCst);
    if previous == online {
      return None;
    }

    let transition = if online {
      Transition::CameOnline
    } else {
      Transition::WentOffline
    };
    info!(?transition, "Connectivity changed");

    // Drop listeners whose receiver is gone
    listeners.retain(|_, tx| tx.send(transition).is_ok());

    Some(transition)
  }

  /// Register for transitions. The registration lasts until the returned
  /// subscription (or a [`ListenerHandle`] taken from it) is disposed.
  pub fn subscribe(&self) -> Subscription {
    let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = mpsc::unbounded_channel();
    self.inner.listeners().insert(id, tx);
    debug!(id, "Connectivity listener registered");

    Subscription {
      rx,
      handle: ListenerHandle {
        id,
        monitor: Arc::downgrade(&self.inner),
      },
    }
  }

  /// Number of registered listeners.
  pub fn listener_count(&self) -> usize {
    self.inner.listeners().len()
  }
}

/// Receiving end of a connectivity subscription. Dropping it unregisters.
pub struct Subscription {
  rx: mpsc::UnboundedReceiver<Transition>,
  handle: ListenerHandle,
}

impl Subscription {
  /// Next transition, or None once unregistered.
  pub async fn recv(&mut self) -> Option<Transition> {
    self.rx.recv().await
  }

  /// Handle that can unregister this subscription from elsewhere, e.g.
  /// while the subscription itself is owned by a spawned task.
  pub fn handle(&self) -> ListenerHandle {
    self.handle.clone()
  }

  pub fn dispose(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.handle.unregister();
  }
}

/// Detached unregister capability for a subscription.
#[derive(Clone)]
pub struct ListenerHandle {
  id: u64,
  monitor: Weak<Inner>,
}

impl ListenerHandle {
  /// Remove the listener now. Its subscription then yields None.
  /// Idempotent.
  pub fn unregister(&self) {
    if let Some(inner) = self.monitor.upgrade() {
      if inner.listeners().remove(&self.id).is_some() {
        debug!(id = self.id, "Connectivity listener unregistered");
      }
    }
  }
}

/// Periodically checks whether the API host answers and feeds the result
/// into a monitor. Stops when dropped.
pub struct ConnectivityProbe {
  task: JoinHandle<()>,
}

impl ConnectivityProbe {
  pub fn spawn(monitor: NetworkMonitor, remote: Remote, url: String, interval: Duration) -> Self {
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let online = remote.is_reachable(&url).await;
        monitor.set_online(online);
      }
    });

    Self { task }
  }
}

impl Drop for ConnectivityProbe {
  fn drop(&mut self) {
    self.task.abort();
  }
}
