//! SQLite-backed local store.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::schema::{self, SCHEMA};
use super::traits::{Collection, Key, Record};
use crate::error::StoreError;

/// Default store location: `$XDG_DATA_HOME/offsync/store.db`.
pub fn default_path() -> Option<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|dir| dir.join("offsync").join("store.db"))
}

/// Transactional key-value store with independently indexed collections.
///
/// Every public operation runs in a single transaction scoped to one
/// collection. Missing keys are `Ok(None)` / empty results, never errors.
pub struct LocalStore {
  conn: Mutex<Connection>,
}

impl LocalStore {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path).map_err(|source| StoreError::Open {
      path: path.display().to_string(),
      source,
    })?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory store. Nothing survives the process.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
      path: ":memory:".to_string(),
      source,
    })?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::LockPoisoned(e.to_string()))
  }

  /// Get a record by primary key.
  pub fn get<R: Record>(
    &self,
    collection: &Collection<R>,
    key: impl Into<Key>,
  ) -> Result<Option<R>, StoreError> {
    let conn = self.lock()?;
    let key = key.into();

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND record_key = ?",
        params![collection.name(), key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  /// Get every record in key order.
  pub fn get_all<R: Record>(&self, collection: &Collection<R>) -> Result<Vec<R>, StoreError> {
    let conn = self.lock()?;
    let mut stmt =
      conn.prepare("SELECT data FROM records WHERE collection = ? ORDER BY record_key")?;

    let rows = stmt
      .query_map(params![collection.name()], |row| row.get::<_, Vec<u8>>(0))?
      .collect::<Result<Vec<_>, _>>()?;

    decode_all(rows)
  }

  /// Get every record whose `index` value equals `value`, ordered by index
  /// value then primary key.
  pub fn get_by_index<R: Record>(
    &self,
    collection: &Collection<R>,
    index: &str,
    value: impl Into<Key>,
  ) -> Result<Vec<R>, StoreError> {
    if !collection.has_index(index) {
      return Err(StoreError::UnknownIndex {
        collection: collection.name(),
        index: index.to_string(),
      });
    }

    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT r.data FROM record_index ri
       INNER JOIN records r ON r.collection = ri.collection AND r.record_key = ri.record_key
       WHERE ri.collection = ? AND ri.index_name = ? AND ri.index_value = ?
       ORDER BY ri.index_value, ri.record_key",
    )?;

    let rows = stmt
      .query_map(params![collection.name(), index, value.into()], |row| {
        row.get::<_, Vec<u8>>(0)
      })?
      .collect::<Result<Vec<_>, _>>()?;

    decode_all(rows)
  }

  /// Insert or replace a record (last write wins).
  pub fn put<R: Record>(&self, collection: &Collection<R>, record: &R) -> Result<Key, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let key = write_record(&tx, collection, record)?;
    tx.commit()?;
    Ok(key)
  }

  /// Upsert many records into one collection in a single transaction.
  pub fn put_all<R: Record>(
    &self,
    collection: &Collection<R>,
    records: &[R],
  ) -> Result<usize, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    for record in records {
      write_record(&tx, collection, record)?;
    }
    tx.commit()?;

    debug!(
      collection = collection.name(),
      count = records.len(),
      "Stored records"
    );
    Ok(records.len())
  }

  /// Append a record under the collection's next id. `build` receives the
  /// allocated id; allocation and insert share one transaction.
  pub fn add<R: Record, F>(&self, collection: &Collection<R>, build: F) -> Result<R, StoreError>
  where
    F: FnOnce(u64) -> R,
  {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let next_id: i64 = tx
      .query_row(
        "SELECT next_id FROM sequences WHERE collection = ?",
        params![collection.name()],
        |row| row.get(0),
      )
      .optional()?
      .unwrap_or(1);

    tx.execute(
      "INSERT OR REPLACE INTO sequences (collection, next_id) VALUES (?, ?)",
      params![collection.name(), next_id + 1],
    )?;

    let record = build(u64::try_from(next_id).unwrap_or_default());
    write_record(&tx, collection, &record)?;
    tx.commit()?;

    Ok(record)
  }

  /// Delete a record and its index entries. Returns whether it existed.
  pub fn delete<R: Record>(
    &self,
    collection: &Collection<R>,
    key: impl Into<Key>,
  ) -> Result<bool, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let key = key.into();

    tx.execute(
      "DELETE FROM record_index WHERE collection = ? AND record_key = ?",
      params![collection.name(), key],
    )?;
    let removed = tx.execute(
      "DELETE FROM records WHERE collection = ? AND record_key = ?",
      params![collection.name(), key],
    )?;
    tx.commit()?;

    Ok(removed > 0)
  }

  /// Remove every record in the collection. Returns how many were removed.
  pub fn clear<R: Record>(&self, collection: &Collection<R>) -> Result<usize, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let removed = clear_collection(&tx, collection.name())?;
    tx.commit()?;
    Ok(removed)
  }

  pub fn count<R: Record>(&self, collection: &Collection<R>) -> Result<usize, StoreError> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM records WHERE collection = ?",
      params![collection.name()],
      |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or_default())
  }

  /// Full reset: empties every domain collection and the response cache.
  /// The mutation queue is left intact so undelivered writes survive.
  pub fn reset(&self) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let mut removed = clear_collection(&tx, schema::CACHE.name())?;
    for kind in crate::types::EntityKind::ALL {
      removed += clear_collection(&tx, kind.collection().name())?;
    }
    tx.commit()?;

    debug!(removed, "Reset local store");
    Ok(())
  }
}

fn write_record<R: Record>(
  tx: &Transaction<'_>,
  collection: &Collection<R>,
  record: &R,
) -> Result<Key, StoreError> {
  let key = record.key();
  let data = serde_json::to_vec(record)?;

  tx.execute(
    "INSERT OR REPLACE INTO records (collection, record_key, data) VALUES (?, ?, ?)",
    params![collection.name(), key, data],
  )?;

  // Rebuild index entries so they never drift from the primary row
  tx.execute(
    "DELETE FROM record_index WHERE collection = ? AND record_key = ?",
    params![collection.name(), key],
  )?;
  for index in collection.indices() {
    if let Some(value) = record.index_key(index) {
      tx.execute(
        "INSERT INTO record_index (collection, index_name, index_value, record_key)
         VALUES (?, ?, ?, ?)",
        params![collection.name(), index, value, key],
      )?;
    }
  }

  Ok(key)
}

fn clear_collection(tx: &Transaction<'_>, name: &str) -> Result<usize, StoreError> {
  tx.execute("DELETE FROM record_index WHERE collection = ?", params![name])?;
  Ok(tx.execute("DELETE FROM records WHERE collection = ?", params![name])?)
}

fn decode_all<R: Record>(rows: Vec<Vec<u8>>) -> Result<Vec<R>, StoreError> {
  rows
    .iter()
    .map(|data| serde_json::from_slice(data).map_err(StoreError::from))
    .collect()
}
