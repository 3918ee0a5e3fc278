//! The worker: install/activate lifecycle, request handling and the message
//! channel, wired around one readiness controller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::error::CacheResult;
use crate::interceptor::{Intercepted, RequestInterceptor, DEFAULT_OFFLINE_MESSAGE, DEFAULT_READY_TIMEOUT};
use crate::manifest::Manifest;
use crate::messages::{Command, Notification};
use crate::net::{Fetcher, Request};
use crate::readiness::ReadinessController;

/// Everything the worker needs to know about the application it serves
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  /// Current generation identifier
  pub generation: String,
  pub manifest: Manifest,
  pub ready_timeout: Duration,
  pub offline_message: String,
}

impl WorkerSettings {
  pub fn new(generation: impl Into<String>, manifest: Manifest) -> Self {
    Self {
      generation: generation.into(),
      manifest,
      ready_timeout: DEFAULT_READY_TIMEOUT,
      offline_message: DEFAULT_OFFLINE_MESSAGE.to_string(),
    }
  }
}

pub struct Worker<S, F> {
  controller: Arc<ReadinessController<S, F>>,
  interceptor: RequestInterceptor<S, F>,
}

impl<S, F> Worker<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(settings: WorkerSettings, store: S, fetcher: F) -> Self {
    let controller = Arc::new(ReadinessController::new(
      settings.generation,
      settings.manifest,
      store,
      fetcher,
    ));
    let interceptor = RequestInterceptor::new(Arc::clone(&controller))
      .with_ready_timeout(settings.ready_timeout)
      .with_offline_message(settings.offline_message);

    Self {
      controller,
      interceptor,
    }
  }

  pub fn controller(&self) -> &Arc<ReadinessController<S, F>> {
    &self.controller
  }

  pub async fn install(&self) -> CacheResult<()> {
    self.controller.install().await
  }

  pub async fn activate(&self) -> CacheResult<Vec<String>> {
    self.controller.activate().await
  }

  /// Install, then activate.
  ///
  /// Activation runs even when install fails; the install error is returned
  /// afterwards.
  pub async fn start(&self) -> CacheResult<()> {
    let installed = self.install().await;
    if let Err(e) = &installed {
      error!(error = %e, "install failed, cache will not be ready until verified");
    }

    let removed = self.activate().await?;
    info!(
      generation = self.controller.generation(),
      removed = removed.len(),
      "worker activated"
    );

    installed
  }

  /// Pick up a store populated by an earlier process.
  pub async fn resume(&self) -> CacheResult<bool> {
    let ready = self.controller.restore().await?;
    if ready {
      info!(generation = self.controller.generation(), "cache already complete");
    } else {
      debug!(generation = self.controller.generation(), "cache incomplete on resume");
    }
    Ok(ready)
  }

  pub async fn fetch(&self, request: Request) -> CacheResult<Intercepted> {
    self.interceptor.handle(request).await
  }

  pub async fn fetch_with_cancel<C>(&self, request: Request, cancel: C) -> CacheResult<Intercepted>
  where
    C: Future<Output = ()>,
  {
    self.interceptor.handle_with_cancel(request, cancel).await
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.controller.subscribe()
  }

  pub async fn handle_command(&self, command: Command) -> Notification {
    match command {
      Command::VerifyCache => self.controller.reconcile().await,
    }
  }

  /// Parse a raw JSON message and run it. Malformed messages never reach
  /// the controller.
  pub async fn post_message(&self, raw: &str) -> CacheResult<Notification> {
    let command: Command = raw.parse()?;
    Ok(self.handle_command(command).await)
  }

  /// Spawn a task that runs commands one at a time as they arrive.
  ///
  /// The task stops once every sender is dropped. Results reach observers
  /// through [`Worker::subscribe`].
  pub fn spawn_message_loop(self: &Arc<Self>) -> (mpsc::UnboundedSender<Command>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = Arc::clone(self);

    let task = tokio::spawn(async move {
      while let Some(command) = rx.recv().await {
        let notification = worker.handle_command(command).await;
        if !notification.is_ready() {
          warn!(?command, ?notification, "command finished without a ready cache");
        }
      }
      debug!("message channel closed");
    });

    (tx, task)
  }
}

/// Take every notification already queued on `rx` without waiting.
///
/// Notifications overwritten while the receiver lagged are skipped; the rest
/// are still returned.
pub fn drain_notifications(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
  let mut drained = Vec::new();
  loop {
    match rx.try_recv() {
      Ok(notification) => drained.push(notification),
      Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "dropped notifications"),
      Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
    }
  }
  drained
}
