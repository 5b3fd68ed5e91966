//! Error types for the offline sync engine.

use thiserror::Error;

/// Failure inside the local store. Never retried internally.
#[derive(Error, Debug)]
pub enum StoreError {
  /// The database file could not be opened or created
  #[error("Failed to open store at {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: rusqlite::Error,
  },

  /// A statement or transaction failed
  #[error("Store transaction failed: {0}")]
  Sqlite(#[from] rusqlite::Error),

  /// A record could not be (de)serialized
  #[error("Failed to serialize record: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The connection mutex was poisoned by a panicking holder
  #[error("Store lock poisoned: {0}")]
  LockPoisoned(String),

  /// Lookup on an index the collection never declared
  #[error("Collection {collection} has no index named {index}")]
  UnknownIndex {
    collection: &'static str,
    index: String,
  },

  /// Filesystem failure while preparing the store location
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// Failure talking to the remote API.
#[derive(Error, Debug)]
pub enum TransportError {
  /// The request never produced an HTTP response
  #[error("Network error for {url}: {message}")]
  Network { url: String, message: String },

  /// The server answered with a non-success status
  #[error("HTTP {status} from {url}")]
  Status { url: String, status: u16 },

  /// The response body was not valid JSON
  #[error("Invalid JSON from {url} (HTTP {status}): {message}")]
  Decode {
    url: String,
    status: u16,
    message: String,
  },

  /// The descriptor could not be turned into a request
  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

/// Top-level error surfaced by the router, reconciler and context.
#[derive(Error, Debug)]
pub enum OfflineError {
  /// Network call failed and no fallback existed
  #[error(transparent)]
  Transport(#[from] TransportError),

  /// No cache entry for the key
  #[error("No cached entry for {0}")]
  CacheMiss(String),

  /// Local store failure
  #[error(transparent)]
  Store(#[from] StoreError),

  /// Offline with nothing cached; the request was queued for replay
  #[error("Offline: {url} is not available in cache (queued as #{queued_id})")]
  OfflineUncached { url: String, queued_id: u64 },
}

impl OfflineError {
  /// Whether this error left the request in the mutation queue.
  pub fn is_queued(&self) -> bool {
    matches!(self, OfflineError::OfflineUncached { .. })
  }
}

pub type Result<T, E = OfflineError> = std::result::Result<T, E>;
