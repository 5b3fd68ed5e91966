//! Boundary to the remote API: the HTTP transport and the header provider.

mod auth;
mod client;

pub use auth::{BearerToken, StaticHeaders};
pub use client::ReqwestTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::TransportError;
use crate::types::RequestDescriptor;

/// Raw answer from the transport, before success is judged.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
  pub status: u16,
  /// Decoded JSON body; `Null` when the body was empty
  pub body: Value,
}

impl TransportResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Sends one request descriptor over the wire.
///
/// Only a missing HTTP response is an `Err`; non-success statuses come back
/// as a `TransportResponse` and are judged by [`Remote`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError>;
}

/// Supplies extra headers (e.g. auth) merged into every outgoing request.
pub trait HeaderProvider: Send + Sync {
  fn headers(&self) -> BTreeMap<String, String>;
}

/// Transport plus header provider: the single way requests leave the process.
#[derive(Clone)]
pub struct Remote {
  transport: Arc<dyn HttpTransport>,
  headers: Arc<dyn HeaderProvider>,
}

impl Remote {
  pub fn new(transport: Arc<dyn HttpTransport>, headers: Arc<dyn HeaderProvider>) -> Self {
    Self { transport, headers }
  }

  /// Merge headers: JSON content type, then provider headers, then the
  /// request's own headers. Later entries win.
  fn prepare(&self, request: &RequestDescriptor) -> RequestDescriptor {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.extend(self.headers.headers());
    headers.extend(request.headers.clone());

    RequestDescriptor {
      headers,
      ..request.clone()
    }
  }

  /// Send a request and return its JSON body if the status is 2xx.
  pub async fn send(&self, request: &RequestDescriptor) -> Result<Value, TransportError> {
    let response = self.transport.send(&self.prepare(request)).await?;

    if response.is_success() {
      Ok(response.body)
    } else {
      Err(TransportError::Status {
        url: request.url.clone(),
        status: response.status,
      })
    }
  }

  /// Send a request judging only its status. A 2xx whose body is not JSON
  /// still counts as delivered.
  pub async fn deliver(&self, request: &RequestDescriptor) -> Result<u16, TransportError> {
    match self.transport.send(&self.prepare(request)).await {
      Ok(response) if response.is_success() => Ok(response.status),
      Ok(response) => Err(TransportError::Status {
        url: request.url.clone(),
        status: response.status,
      }),
      Err(TransportError::Decode { status, .. }) if (200..300).contains(&status) => Ok(status),
      Err(e) => Err(e),
    }
  }

  /// Whether the host answered at all. Any HTTP status counts as reachable.
  pub async fn is_reachable(&self, url: &str) -> bool {
    match self.transport.send(&self.prepare(&RequestDescriptor::get(url))).await {
      Ok(_) => true,
      Err(TransportError::Network { .. }) | Err(TransportError::InvalidRequest(_)) => false,
      Err(_) => true,
    }
  }
}
