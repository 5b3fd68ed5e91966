use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

use super::{HttpTransport, TransportResponse};
use crate::error::TransportError;
use crate::types::RequestDescriptor;

/// HTTP transport backed by reqwest
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| TransportError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let network_err = |e: reqwest::Error| TransportError::Network {
      url: request.url.clone(),
      message: e.to_string(),
    };

    let response = builder.send().await.map_err(network_err)?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(network_err)?;

    let body = if bytes.is_empty() {
      Value::Null
    } else {
      match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        // Error pages are often HTML; the status is what matters there
        Err(_) if !status.is_success() => Value::Null,
        Err(e) => {
          return Err(TransportError::Decode {
            url: request.url.clone(),
            status: status.as_u16(),
            message: e.to_string(),
          })
        }
      }
    };

    Ok(TransportResponse {
      status: status.as_u16(),
      body,
    })
  }
}
