//! Core traits and types for typed collections.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Primary or index key. Integer keys sort numerically, text keys lexically,
/// and every integer sorts before every text value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
  Int(i64),
  Text(String),
}

impl fmt::Display for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Key::Int(i) => write!(f, "{}", i),
      Key::Text(s) => f.write_str(s),
    }
  }
}

impl From<i64> for Key {
  fn from(v: i64) -> Self {
    Key::Int(v)
  }
}

impl From<u64> for Key {
  fn from(v: u64) -> Self {
    Key::Int(i64::try_from(v).unwrap_or(i64::MAX))
  }
}

impl From<&str> for Key {
  fn from(v: &str) -> Self {
    Key::Text(v.to_string())
  }
}

impl From<String> for Key {
  fn from(v: String) -> Self {
    Key::Text(v)
  }
}

impl From<&String> for Key {
  fn from(v: &String) -> Self {
    Key::Text(v.clone())
  }
}

impl ToSql for Key {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(match self {
      Key::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
      Key::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
    })
  }
}

impl FromSql for Key {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
    match value {
      ValueRef::Integer(i) => Ok(Key::Int(i)),
      ValueRef::Text(t) => std::str::from_utf8(t)
        .map(|s| Key::Text(s.to_string()))
        .map_err(|e| FromSqlError::Other(Box::new(e))),
      _ => Err(FromSqlError::InvalidType),
    }
  }
}

/// Trait for values that can live in a collection.
///
/// Implementors provide their primary key and the value for each secondary
/// index they participate in.
pub trait Record: Serialize + DeserializeOwned {
  /// Primary key of this record
  fn key(&self) -> Key;

  /// Value for the named secondary index, or None to leave the record out
  /// of that index.
  fn index_key(&self, _index: &str) -> Option<Key> {
    None
  }
}

/// A named collection of records of type `R`, with its declared secondary
/// indices. Collections are declared once in [`super::schema`].
pub struct Collection<R> {
  name: &'static str,
  indices: &'static [&'static str],
  _record: PhantomData<fn() -> R>,
}

impl<R> Collection<R> {
  pub const fn new(name: &'static str, indices: &'static [&'static str]) -> Self {
    Self {
      name,
      indices,
      _record: PhantomData,
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn indices(&self) -> &'static [&'static str] {
    self.indices
  }

  pub fn has_index(&self, index: &str) -> bool {
    self.indices.contains(&index)
  }
}

impl<R> fmt::Debug for Collection<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Collection")
      .field("name", &self.name)
      .field("indices", &self.indices)
      .finish()
  }
}
