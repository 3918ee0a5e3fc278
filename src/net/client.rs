use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{CacheError, CacheResult};

use super::types::{Request, Response, ResponseKind};

/// Anything that can take a request to the network.
///
/// A transport failure is an `Err`; an HTTP error status is still an `Ok`
/// response and it is up to the caller to decide what to do with it.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> CacheResult<Response>;
}

/// HTTP fetcher bound to the origin of the application it serves
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  scope: Url,
}

impl HttpFetcher {
  pub fn new(scope: Url, timeout: Duration) -> CacheResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| CacheError::fetch(scope.as_str(), format!("failed to create HTTP client: {}", e)))?;

    Ok(Self { client, scope })
  }

  /// Same-origin responses are `basic`, everything else is `cors`
  fn kind_for(&self, url: &Url) -> ResponseKind {
    if url.origin() == self.scope.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> CacheResult<Response> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| CacheError::fetch(request.url.as_str(), format!("bad header name: {}", e)))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| CacheError::fetch(request.url.as_str(), format!("bad header value: {}", e)))?;
      headers.append(name, value);
    }

    debug!(method = %request.method, url = %request.url, "fetching from network");

    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(headers)
      .send()
      .await
      .map_err(|e| CacheError::fetch(request.url.as_str(), e))?;

    let status = response.status().as_u16();
    let kind = self.kind_for(response.url());
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| CacheError::fetch(request.url.as_str(), format!("failed to read body: {}", e)))?;

    Ok(Response {
      status,
      headers,
      body,
      kind,
    })
  }
}
