//! Readiness tracking for the current cache generation.
//!
//! The controller owns the lifecycle of one generation:
//!
//! ```text
//! Uninitialized -> Populating -> Ready <-> Repairing
//! ```
//!
//! `install` populates the generation in one all-or-nothing batch,
//! `activate` drops every other generation, and `reconcile` compares the
//! stored keys against the manifest and fetches whatever is missing. Only
//! `Ready` counts as ready from the outside. Other components observe the
//! state through [`ReadinessController::is_ready`] and
//! [`ReadinessController::wait_ready`], and front-ends receive a
//! [`Notification`] after every reconciliation.
//!
//! Every mutation of the current generation (population, repair and the
//! interceptor's write-backs) goes through one writer gate, so two tasks
//! never modify the generation at the same time. Reconciliations queue on the
//! same gate; a second request runs after the first and sees its result.

use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStore, GenerationHandle, StoredResponse};
use crate::error::{CacheError, CacheResult};
use crate::manifest::Manifest;
use crate::messages::Notification;
use crate::net::{Fetcher, Request, Response};

const NOTIFICATION_CAPACITY: usize = 16;

/// Lifecycle state of the current generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
  /// Nothing has been attempted yet
  Uninitialized,
  /// Install is running, or ran and failed
  Populating,
  /// Every manifest entry was stored at the last check
  Ready,
  /// Entries went missing and a repair is running or failed
  Repairing,
}

impl CacheState {
  pub fn is_ready(&self) -> bool {
    matches!(self, CacheState::Ready)
  }
}

/// Snapshot of the cache for diagnostics
#[derive(Debug, Clone)]
pub struct CacheStatus {
  pub generation: String,
  pub state: CacheState,
  pub stored: usize,
  pub missing: Vec<Url>,
  pub generations: Vec<String>,
}

pub struct ReadinessController<S, F> {
  generation: String,
  manifest: Manifest,
  store: Arc<S>,
  fetcher: Arc<F>,
  handle: OnceCell<GenerationHandle>,
  state: watch::Sender<CacheState>,
  notifications: broadcast::Sender<Notification>,
  writer: Mutex<()>,
  write_backs: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<S, F> ReadinessController<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(generation: impl Into<String>, manifest: Manifest, store: S, fetcher: F) -> Self {
    Self::with_shared(generation, manifest, Arc::new(store), Arc::new(fetcher))
  }

  pub fn with_shared(
    generation: impl Into<String>,
    manifest: Manifest,
    store: Arc<S>,
    fetcher: Arc<F>,
  ) -> Self {
    let (state, _) = watch::channel(CacheState::Uninitialized);
    let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

    Self {
      generation: generation.into(),
      manifest,
      store,
      fetcher,
      handle: OnceCell::new(),
      state,
      notifications,
      writer: Mutex::new(()),
      write_backs: std::sync::Mutex::new(Vec::new()),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn fetcher(&self) -> &F {
    &self.fetcher
  }

  pub fn state(&self) -> CacheState {
    *self.state.borrow()
  }

  pub fn is_ready(&self) -> bool {
    self.state().is_ready()
  }

  /// Receive every notification sent after this call.
  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.notifications.subscribe()
  }

  /// Wait until the cache is ready, for at most `max_wait`.
  ///
  /// Returns whether the cache became ready in time.
  pub async fn wait_ready(&self, max_wait: Duration) -> bool {
    let mut rx = self.state.subscribe();
    tokio::time::timeout(max_wait, rx.wait_for(CacheState::is_ready))
      .await
      .map(|changed| changed.is_ok())
      .unwrap_or(false)
  }

  fn set_state(&self, state: CacheState) {
    let previous = self.state.send_replace(state);
    if previous != state {
      debug!(generation = %self.generation, ?previous, ?state, "cache state changed");
    }
  }

  /// Only a ready cache moves to `Repairing`; a cache that never finished
  /// populating keeps its state.
  fn mark_repairing(&self) {
    self.state.send_if_modified(|state| {
      if state.is_ready() {
        *state = CacheState::Repairing;
        true
      } else {
        false
      }
    });
  }

  async fn current(&self) -> CacheResult<&GenerationHandle> {
    self
      .handle
      .get_or_try_init(|| async { self.store.open_generation(&self.generation) })
      .await
  }

  /// Populate the current generation with every manifest entry.
  ///
  /// All entries are fetched before anything is written; one failed fetch or
  /// non-success status leaves the store untouched and the state at
  /// `Populating`.
  pub async fn install(&self) -> CacheResult<()> {
    let _writer = self.writer.lock().await;
    self.set_state(CacheState::Populating);
    info!(
      generation = %self.generation,
      resources = self.manifest.len(),
      "populating cache"
    );

    let result = async {
      let handle = self.current().await?;
      let entries = self.fetch_all(self.manifest.entries()).await?;
      self.store.put_all(handle, &entries)
    }
    .await;

    match result {
      Ok(()) => {
        self.set_state(CacheState::Ready);
        info!(generation = %self.generation, "cache populated");
        Ok(())
      }
      Err(e) => {
        warn!(generation = %self.generation, error = %e, "cache population failed");
        Err(CacheError::PopulationIncomplete {
          generation: self.generation.clone(),
          source: Box::new(e),
        })
      }
    }
  }

  /// Delete every generation other than the current one.
  ///
  /// Returns the deleted generation ids.
  pub async fn activate(&self) -> CacheResult<Vec<String>> {
    let stale: Vec<String> = self
      .store
      .list_generations()?
      .into_iter()
      .filter(|id| *id != self.generation)
      .collect();

    for id in &stale {
      self.store.delete_generation(id)?;
      info!(generation = %id, "deleted stale cache generation");
    }

    Ok(stale)
  }

  /// Re-check the current generation against the manifest and fetch what is
  /// missing. Existing entries are never touched.
  ///
  /// Always resolves to a notification, which is also broadcast to every
  /// subscriber.
  pub async fn reconcile(&self) -> Notification {
    let _writer = self.writer.lock().await;

    let notification = match self.repair().await {
      Ok(()) => Notification::OfflineReady,
      Err(e) => {
        warn!(generation = %self.generation, error = %e, "cache verification failed");
        self.mark_repairing();
        Notification::not_ready(&e)
      }
    };

    let receivers = self.notifications.send(notification.clone()).unwrap_or(0);
    debug!(?notification, receivers, "sent cache notification");

    notification
  }

  async fn repair(&self) -> CacheResult<()> {
    let handle = self.current().await?;
    let stored = self.store.list_keys(handle)?;
    let missing = self.manifest.missing(&stored[..]);

    if missing.is_empty() {
      debug!(generation = %self.generation, "no missing resources");
      self.set_state(CacheState::Ready);
      return Ok(());
    }

    info!(
      generation = %self.generation,
      missing = missing.len(),
      "repairing cache"
    );
    self.mark_repairing();

    let entries = self.fetch_all(&missing).await?;
    self.store.put_all(handle, &entries)?;

    info!(generation = %self.generation, repaired = entries.len(), "missing resources cached");
    self.set_state(CacheState::Ready);
    Ok(())
  }

  /// Mark the cache ready if the store already satisfies the manifest.
  ///
  /// Used when a process starts against a store populated by an earlier one.
  /// Never fetches and never notifies.
  pub async fn restore(&self) -> CacheResult<bool> {
    let _writer = self.writer.lock().await;
    let handle = self.current().await?;
    let stored = self.store.list_keys(handle)?;

    let complete = self.manifest.missing(&stored[..]).is_empty();
    if complete {
      self.set_state(CacheState::Ready);
    }
    Ok(complete)
  }

  /// Look up a stored response in the current generation.
  pub async fn lookup(&self, url: &Url) -> CacheResult<Option<StoredResponse>> {
    let handle = self.current().await?;
    self.store.get(handle, url.as_str())
  }

  /// Write a response back to the current generation in the background.
  pub fn write_back(self: &Arc<Self>, url: Url, response: Response) {
    let controller = Arc::clone(self);
    let task = tokio::spawn(async move {
      let _writer = controller.writer.lock().await;
      let result = match controller.current().await {
        Ok(handle) => controller.store.put(handle, url.as_str(), &response),
        Err(e) => Err(e),
      };

      match result {
        Ok(()) => debug!(url = %url, "cached network response"),
        Err(e) => warn!(url = %url, error = %e, "failed to cache network response"),
      }
    });

    if let Ok(mut pending) = self.write_backs.lock() {
      pending.retain(|task| !task.is_finished());
      pending.push(task);
    }
  }

  /// Wait for every background write-back started so far.
  pub async fn flush(&self) {
    let pending: Vec<JoinHandle<()>> = match self.write_backs.lock() {
      Ok(mut pending) => pending.drain(..).collect(),
      Err(_) => return,
    };

    for task in pending {
      if let Err(e) = task.await {
        warn!(error = %e, "write-back task failed");
      }
    }
  }

  /// Diagnostic snapshot of the current generation.
  pub async fn status(&self) -> CacheResult<CacheStatus> {
    let handle = self.current().await?;
    let stored = self.store.list_keys(handle)?;

    Ok(CacheStatus {
      generation: self.generation.clone(),
      state: self.state(),
      stored: stored.len(),
      missing: self.manifest.missing(&stored[..]),
      generations: self.store.list_generations()?.into_iter().collect(),
    })
  }

  async fn fetch_all(&self, urls: &[Url]) -> CacheResult<Vec<(String, Response)>> {
    let fetches = urls.iter().map(|url| async move {
      let response = self.fetcher.fetch(&Request::get(url.clone())).await?;
      if !response.is_success() {
        return Err(CacheError::fetch(
          url.as_str(),
          format!("server responded with status {}", response.status),
        ));
      }
      Ok((url.to_string(), response))
    });

    try_join_all(fetches).await
  }
}
