use std::collections::BTreeMap;

use super::HeaderProvider;

/// Adds `Authorization: Bearer <token>` when a token is available.
#[derive(Debug, Clone, Default)]
pub struct BearerToken {
  token: Option<String>,
}

impl BearerToken {
  pub fn new(token: Option<String>) -> Self {
    Self { token }
  }

  /// Read the token from an environment variable. A missing or empty
  /// variable yields a provider that adds nothing.
  pub fn from_env(var: &str) -> Self {
    let token = std::env::var(var).ok().filter(|t| !t.trim().is_empty());
    Self { token }
  }
}

impl HeaderProvider for BearerToken {
  fn headers(&self) -> BTreeMap<String, String> {
    self
      .token
      .iter()
      .map(|t| ("Authorization".to_string(), format!("Bearer {}", t)))
      .collect()
  }
}

/// Fixed set of headers.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders(BTreeMap<String, String>);

impl StaticHeaders {
  pub fn new<I, K, V>(headers: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self(
      headers
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

impl HeaderProvider for StaticHeaders {
  fn headers(&self) -> BTreeMap<String, String> {
    self.0.clone()
  }
}
