//! Offline-first data access for a REST API.
//!
//! Reads go to the network when it is reachable and fall back to a durable
//! local store when it is not; writes made offline are queued and replayed
//! in order once connectivity returns.

pub mod context;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod reconciler;
pub mod remote;
pub mod router;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use context::{ConnectivityState, OfflineContext};
pub use domain::{AchievementEvent, DomainClient, ResourceKey};
pub use error::{OfflineError, Result, StoreError, TransportError};
pub use monitor::{ConnectivityProbe, NetworkMonitor, Transition};
pub use queue::MutationQueue;
pub use reconciler::{PassOutcome, Reconciler, SyncReport, SyncStatus};
pub use remote::{BearerToken, HttpTransport, Remote, ReqwestTransport};
pub use router::{Fetched, RequestRouter, ResponseSource};
pub use store::LocalStore;
pub use types::{CacheEntry, DomainRecord, EntityKind, QueuedMutation, RequestDescriptor};
