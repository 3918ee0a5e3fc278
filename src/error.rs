//! Error types for the offline cache.

use std::fmt::Display;

/// Errors produced by the cache store, the readiness controller and the
/// request interceptor.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// The persistent store could not be opened, read or written.
  #[error("cache storage unavailable: {message}")]
  StoreUnavailable { message: String },

  /// A network fetch failed or returned a non-success status.
  #[error("failed to fetch {url}: {message}")]
  FetchFailed { url: String, message: String },

  /// Install never reached the ready state.
  #[error("population of cache generation {generation} did not complete: {source}")]
  PopulationIncomplete {
    generation: String,
    #[source]
    source: Box<CacheError>,
  },

  /// The caller gave up on a request while it waited for the cache.
  #[error("request for {url} was cancelled while waiting for the cache")]
  Cancelled { url: String },

  /// A manifest entry or request URL could not be resolved.
  #[error("invalid resource '{resource}': {message}")]
  InvalidResource { resource: String, message: String },

  /// An inbound message did not match any known command.
  #[error("invalid command: {message}")]
  InvalidCommand { message: String },
}

impl CacheError {
  pub(crate) fn store(context: &str, err: impl Display) -> Self {
    Self::StoreUnavailable {
      message: format!("{}: {}", context, err),
    }
  }

  pub(crate) fn fetch(url: impl Into<String>, message: impl Display) -> Self {
    Self::FetchFailed {
      url: url.into(),
      message: message.to_string(),
    }
  }
}

pub type CacheResult<T> = Result<T, CacheError>;
