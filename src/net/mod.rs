//! Network side of the cache: request/response types and the fetcher seam.

mod client;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{Request, Response, ResponseKind};
