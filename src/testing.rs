//! Test doubles shared by the controller, interceptor and worker tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::manifest::Manifest;
use crate::net::{Fetcher, Request, Response, ResponseKind};

pub const SCOPE: &str = "http://app.test/";

pub fn scope() -> Url {
  Url::parse(SCOPE).unwrap()
}

pub fn url(path: &str) -> Url {
  scope().join(path).unwrap()
}

pub fn manifest(paths: &[&str]) -> Manifest {
  Manifest::new(scope(), paths.iter().copied()).unwrap()
}

pub fn page(body: &str) -> Response {
  Response::new(200, ResponseKind::Basic, body.to_string())
}

/// Fetcher that answers from a script instead of the network.
///
/// Unscripted URLs fail like an unreachable host.
#[derive(Default)]
pub struct ScriptedFetcher {
  responses: Mutex<HashMap<String, Result<Response, String>>>,
  calls: Mutex<Vec<String>>,
  count: AtomicUsize,
  delay: Mutex<Option<Duration>>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `200 <path>` for each path
  pub fn serving(paths: &[&str]) -> Self {
    let fetcher = Self::new();
    for path in paths {
      fetcher.respond(path, page(path));
    }
    fetcher
  }

  pub fn respond(&self, path: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Ok(response));
  }

  pub fn fail(&self, path: &str, message: &str) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Err(message.to_string()));
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn call_count(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }

  pub fn calls_for(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| **u == target)
      .count()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> CacheResult<Response> {
    self.count.fetch_add(1, Ordering::SeqCst);
    self.calls.lock().unwrap().push(request.url.to_string());

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let scripted = self
      .responses
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned();

    match scripted {
      Some(Ok(response)) => Ok(response),
      Some(Err(message)) => Err(CacheError::fetch(request.url.as_str(), message)),
      None => Err(CacheError::fetch(request.url.as_str(), "connection refused")),
    }
  }
}
