//! Core traits and types for the cache store.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::error::CacheResult;
use crate::net::Response;

/// An opened cache generation.
///
/// Only obtainable from [`CacheStore::open_generation`], so holding one means
/// the generation existed at the time it was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationHandle {
  id: String,
}

impl GenerationHandle {
  pub(crate) fn new(id: impl Into<String>) -> Self {
    Self { id: id.into() }
  }

  pub fn id(&self) -> &str {
    &self.id
  }
}

/// A response as it sits in the store.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub response: Response,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// Persistent mapping of resource URL to response, partitioned by generation.
///
/// Implementations are pass-through: no retries and no state kept between
/// calls beyond the stored data itself.
pub trait CacheStore: Send + Sync {
  /// Open a generation, creating it if it does not exist.
  fn open_generation(&self, id: &str) -> CacheResult<GenerationHandle>;

  /// Stored resource URLs, in insertion order.
  fn list_keys(&self, generation: &GenerationHandle) -> CacheResult<Vec<String>>;

  /// Look up one resource.
  fn get(&self, generation: &GenerationHandle, url: &str) -> CacheResult<Option<StoredResponse>>;

  /// Store one resource, replacing any previous value.
  fn put(&self, generation: &GenerationHandle, url: &str, response: &Response) -> CacheResult<()>;

  /// Store a batch of resources. Either all of them land or none do.
  fn put_all(&self, generation: &GenerationHandle, entries: &[(String, Response)])
    -> CacheResult<()>;

  /// Drop a generation and everything in it. Returns whether it existed.
  fn delete_generation(&self, id: &str) -> CacheResult<bool>;

  /// Every generation currently in the store.
  fn list_generations(&self) -> CacheResult<BTreeSet<String>>;
}
