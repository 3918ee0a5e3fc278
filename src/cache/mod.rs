//! Persistent response storage, partitioned into versioned generations.
//!
//! A generation is one snapshot of the application's assets. Exactly one
//! generation is current; the readiness controller deletes the rest on
//! activation. Both stores here are plain pass-through adapters: they never
//! retry and keep no state besides the stored responses.

mod storage;
mod traits;

pub use storage::{MemoryStore, SqliteStore};
pub use traits::{CacheStore, GenerationHandle, StoredResponse};
