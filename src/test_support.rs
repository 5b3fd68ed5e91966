//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;
use crate::monitor::NetworkMonitor;
use crate::remote::{HttpTransport, Remote, StaticHeaders, TransportResponse};
use crate::store::LocalStore;
use crate::types::RequestDescriptor;

#[derive(Default)]
struct Script {
  responses: HashMap<String, (u16, Value)>,
  failing: HashSet<String>,
  unreachable: bool,
  delay: Option<Duration>,
  calls: Vec<RequestDescriptor>,
}

/// In-process transport answering from a per-URL script and recording every
/// request it sees. Unscripted URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
  script: Mutex<Script>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: Value) {
    let mut script = self.script.lock().unwrap();
    script.failing.remove(url);
    script.responses.insert(url.to_string(), (status, body));
  }

  /// Make requests to `url` fail without a response.
  pub fn fail(&self, url: &str) {
    self.script.lock().unwrap().failing.insert(url.to_string());
  }

  pub fn set_unreachable(&self, unreachable: bool) {
    self.script.lock().unwrap().unreachable = unreachable;
  }

  pub fn set_delay(&self, delay: Duration) {
    self.script.lock().unwrap().delay = Some(delay);
  }

  pub fn calls(&self) -> Vec<RequestDescriptor> {
    self.script.lock().unwrap().calls.clone()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self.calls().iter().filter(|c| c.url == url).count()
  }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
  async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
    let delay = {
      let mut script = self.script.lock().unwrap();
      script.calls.push(request.clone());
      script.delay
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let script = self.script.lock().unwrap();
    if script.unreachable || script.failing.contains(&request.url) {
      return Err(TransportError::Network {
        url: request.url.clone(),
        message: "connection refused".to_string(),
      });
    }

    let (status, body) = script
      .responses
      .get(&request.url)
      .cloned()
      .unwrap_or((404, Value::Null));
    Ok(TransportResponse { status, body })
  }
}

/// Shared pieces most component tests need.
pub struct Harness {
  pub store: Arc<LocalStore>,
  pub transport: Arc<ScriptedTransport>,
  pub remote: Remote,
  pub monitor: NetworkMonitor,
}

impl Harness {
  pub fn new(online: bool) -> Self {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let transport = Arc::new(ScriptedTransport::new());
    let remote = Remote::new(transport.clone(), Arc::new(StaticHeaders::default()));
    Self {
      store,
      transport,
      remote,
      monitor: NetworkMonitor::new(online),
    }
  }
}
