//! Offline asset cache for a small static web application.
//!
//! A [`Worker`] keeps one versioned generation of the application's assets
//! in a [`CacheStore`], serves requests from it before going to the network,
//! and repairs it when asked to verify. Front-ends talk to it through typed
//! [`Command`]s and receive [`Notification`]s.

pub mod cache;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod manifest;
pub mod messages;
pub mod net;
pub mod readiness;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStore, MemoryStore, SqliteStore};
pub use error::{CacheError, CacheResult};
pub use interceptor::{Intercepted, RequestInterceptor, ResponseSource};
pub use manifest::Manifest;
pub use messages::{Command, Notification};
pub use net::{Fetcher, HttpFetcher, Request, Response, ResponseKind};
pub use readiness::{CacheState, CacheStatus, ReadinessController};
pub use worker::{Worker, WorkerSettings};
