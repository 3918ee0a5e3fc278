//! Cache-first request handling with offline fallback.

use chrono::{DateTime, Utc};
use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheStore, StoredResponse};
use crate::error::{CacheError, CacheResult};
use crate::manifest::normalize;
use crate::net::{Fetcher, Request, Response, ResponseKind};
use crate::readiness::ReadinessController;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OFFLINE_MESSAGE: &str = "You are offline. Some features may not be available.";

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Served from the current generation, no network call made
  Cache,
  /// Fresh from the network
  Network,
  /// Network unavailable and nothing cached: synthesized placeholder
  Offline,
}

/// A response together with metadata about its source.
#[derive(Debug, Clone)]
pub struct Intercepted {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Intercepted {
  fn from_cache(stored: StoredResponse) -> Self {
    Self {
      response: stored.response,
      source: ResponseSource::Cache,
      cached_at: Some(stored.cached_at),
    }
  }

  fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  fn offline(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      cached_at: None,
    }
  }
}

/// Answers requests from the current generation first and the network second.
pub struct RequestInterceptor<S, F> {
  controller: Arc<ReadinessController<S, F>>,
  ready_timeout: Duration,
  offline_message: String,
}

impl<S, F> RequestInterceptor<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(controller: Arc<ReadinessController<S, F>>) -> Self {
    Self {
      controller,
      ready_timeout: DEFAULT_READY_TIMEOUT,
      offline_message: DEFAULT_OFFLINE_MESSAGE.to_string(),
    }
  }

  /// Upper bound on how long a cache miss waits for the cache to become ready.
  pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
    self.ready_timeout = ready_timeout;
    self
  }

  pub fn with_offline_message(mut self, message: impl Into<String>) -> Self {
    self.offline_message = message.into();
    self
  }

  /// Handle a request that cannot be cancelled.
  pub async fn handle(&self, request: Request) -> CacheResult<Intercepted> {
    self.handle_with_cancel(request, future::pending::<()>()).await
  }

  /// Handle a request, giving up with `Cancelled` if `cancel` resolves while
  /// the request is waiting for the cache to become ready.
  ///
  /// 1. GET requests are looked up in the current generation; a hit is
  ///    returned without touching the network
  /// 2. On a miss, wait for readiness (bounded by the ready timeout)
  /// 3. Fetch from the network; cacheable responses are written back in the
  ///    background
  /// 4. On network failure, return the offline placeholder
  pub async fn handle_with_cancel<C>(&self, mut request: Request, cancel: C) -> CacheResult<Intercepted>
  where
    C: Future<Output = ()>,
  {
    request.url = normalize(request.url);
    let cacheable = request.is_get();

    if cacheable {
      match self.controller.lookup(&request.url).await {
        Ok(Some(stored)) => {
          debug!(url = %request.url, "served from cache");
          return Ok(Intercepted::from_cache(stored));
        }
        Ok(None) => {}
        Err(e) => warn!(url = %request.url, error = %e, "cache lookup failed"),
      }

      if !self.controller.is_ready() {
        debug!(url = %request.url, "cache not ready, waiting");
        tokio::select! {
          ready = self.controller.wait_ready(self.ready_timeout) => {
            if !ready {
              warn!(
                url = %request.url,
                timeout_ms = self.ready_timeout.as_millis() as u64,
                "cache still not ready, going to network"
              );
            }
          }
          _ = cancel => {
            debug!(url = %request.url, "request cancelled while waiting");
            return Err(CacheError::Cancelled {
              url: request.url.to_string(),
            });
          }
        }
      }
    }

    match self.controller.fetcher().fetch(&request).await {
      Ok(response) => {
        if cacheable && response.is_cacheable() {
          self
            .controller
            .write_back(request.url.clone(), response.clone());
        }
        Ok(Intercepted::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "network unavailable, serving offline placeholder");
        Ok(Intercepted::offline(self.offline_response()))
      }
    }
  }

  fn offline_response(&self) -> Response {
    Response::new(200, ResponseKind::Synthetic, self.offline_message.clone())
      .with_header("content-type", "text/plain; charset=utf-8")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::testing::{manifest, url, ScriptedFetcher};
  use reqwest::Method;
  use tokio::sync::oneshot;

  type Controller = ReadinessController<MemoryStore, ScriptedFetcher>;

  fn setup(paths: &[&str], fetcher: ScriptedFetcher) -> (Arc<Controller>, RequestInterceptor<MemoryStore, ScriptedFetcher>) {
    let controller = Arc::new(ReadinessController::new(
      "v1",
      manifest(paths),
      MemoryStore::new(),
      fetcher,
    ));
    let interceptor = RequestInterceptor::new(Arc::clone(&controller))
      .with_ready_timeout(Duration::from_millis(50));
    (controller, interceptor)
  }

  async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  #[tokio::test]
  async fn test_cached_resource_needs_no_network() {
    let (controller, interceptor) = setup(&["index.html"], ScriptedFetcher::serving(&["index.html"]));
    controller.install().await.unwrap();
    let calls_after_install = controller.fetcher().call_count();

    let result = interceptor.handle(Request::get(url("index.html"))).await.unwrap();

    assert_eq!(result.source, ResponseSource::Cache);
    assert!(result.cached_at.is_some());
    assert_eq!(&result.response.body[..], b"index.html");
    assert_eq!(controller.fetcher().call_count(), calls_after_install);
  }

  #[tokio::test]
  async fn test_fragment_does_not_defeat_cache() {
    let (controller, interceptor) = setup(&["index.html"], ScriptedFetcher::serving(&["index.html"]));
    controller.install().await.unwrap();

    let result = interceptor
      .handle(Request::get(url("index.html#settings")))
      .await
      .unwrap();

    assert_eq!(result.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_miss_fetches_and_writes_back() {
    let fetcher = ScriptedFetcher::serving(&["index.html", "extra.png"]);
    let (controller, interceptor) = setup(&["index.html"], fetcher);
    controller.install().await.unwrap();

    let first = interceptor.handle(Request::get(url("extra.png"))).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    controller.flush().await;

    let second = interceptor.handle(Request::get(url("extra.png"))).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(controller.fetcher().calls_for("extra.png"), 1);
  }

  #[tokio::test]
  async fn test_non_cacheable_responses_pass_through() {
    let fetcher = ScriptedFetcher::serving(&["index.html"]);
    fetcher.respond("gone.js", Response::new(404, ResponseKind::Basic, "missing"));
    fetcher.respond("cdn.js", Response::new(200, ResponseKind::Cors, "remote"));
    let (controller, interceptor) = setup(&["index.html"], fetcher);
    controller.install().await.unwrap();

    let gone = interceptor.handle(Request::get(url("gone.js"))).await.unwrap();
    let cdn = interceptor.handle(Request::get(url("cdn.js"))).await.unwrap();
    controller.flush().await;

    assert_eq!(gone.response.status, 404);
    assert_eq!(gone.source, ResponseSource::Network);
    assert_eq!(cdn.response.kind, ResponseKind::Cors);
    assert!(controller.lookup(&url("gone.js")).await.unwrap().is_none());
    assert!(controller.lookup(&url("cdn.js")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_non_get_requests_are_never_cached() {
    let fetcher = ScriptedFetcher::serving(&["index.html", "api/save"]);
    let (controller, interceptor) = setup(&["index.html"], fetcher);
    controller.install().await.unwrap();

    let mut request = Request::get(url("api/save"));
    request.method = Method::POST;
    let result = interceptor.handle(request).await.unwrap();
    controller.flush().await;

    assert_eq!(result.source, ResponseSource::Network);
    assert!(controller.lookup(&url("api/save")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_failure_yields_offline_placeholder() {
    let (controller, interceptor) = setup(&["index.html"], ScriptedFetcher::serving(&["index.html"]));
    controller.install().await.unwrap();

    let result = interceptor.handle(Request::get(url("uncached.js"))).await.unwrap();

    assert_eq!(result.source, ResponseSource::Offline);
    assert_eq!(result.response.kind, ResponseKind::Synthetic);
    assert_eq!(&result.response.body[..], DEFAULT_OFFLINE_MESSAGE.as_bytes());
    assert_eq!(
      result.response.header("content-type"),
      Some("text/plain; charset=utf-8")
    );
  }

  #[tokio::test]
  async fn test_custom_offline_message() {
    let (controller, interceptor) = setup(&["index.html"], ScriptedFetcher::serving(&["index.html"]));
    let interceptor = interceptor.with_offline_message("offline, sorry");
    controller.install().await.unwrap();

    let result = interceptor.handle(Request::get(url("nope"))).await.unwrap();
    assert_eq!(&result.response.body[..], b"offline, sorry");
  }

  #[tokio::test]
  async fn test_not_ready_request_resolves_after_timeout() {
    let fetcher = ScriptedFetcher::serving(&["late.js"]);
    let (controller, interceptor) = setup(&["index.html"], fetcher);
    assert!(!controller.is_ready());

    let result = tokio::time::timeout(
      Duration::from_secs(5),
      interceptor.handle(Request::get(url("late.js"))),
    )
    .await
    .expect("request should not wait forever")
    .unwrap();

    assert_eq!(result.source, ResponseSource::Network);
  }

  #[tokio::test]
  async fn test_waiting_request_can_be_cancelled() {
    let (_controller, interceptor) = setup(&["index.html"], ScriptedFetcher::new());
    let interceptor = interceptor.with_ready_timeout(Duration::from_secs(60));
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    let cancel = async move {
      let _ = cancel_rx.await;
    };
    let pending = interceptor.handle_with_cancel(Request::get(url("index.html")), cancel);
    let canceller = async {
      settle().await;
      let _ = cancel_tx.send(());
    };

    let (result, ()) = tokio::join!(pending, canceller);

    assert!(matches!(result, Err(CacheError::Cancelled { .. })));
  }

  #[tokio::test]
  async fn test_waiting_request_resumes_when_ready() {
    let fetcher = ScriptedFetcher::serving(&["index.html", "extra.js"]);
    fetcher.set_delay(Duration::from_millis(20));
    let (controller, interceptor) = setup(&["index.html"], fetcher);
    let interceptor = interceptor.with_ready_timeout(Duration::from_secs(60));

    let installer = Arc::clone(&controller);
    let install = tokio::spawn(async move { installer.install().await });

    let result = tokio::time::timeout(
      Duration::from_secs(5),
      interceptor.handle(Request::get(url("extra.js"))),
    )
    .await
    .expect("request should resume once the cache is ready")
    .unwrap();

    assert!(install.await.unwrap().is_ok());
    assert!(controller.is_ready());
    assert_eq!(result.source, ResponseSource::Network);
  }
}
