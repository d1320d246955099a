//! Data acquisition and persistence

pub mod circuit_breaker;
pub mod codec;
pub mod provider;
pub mod store;
pub mod yahoo;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use codec::{ParseError, HEADER};
pub use provider::{FetchError, Fetched, RemoteFetcher};
pub use store::{CacheMeta, CacheStore, Cached, FileStore, StoreError};
pub use yahoo::YahooFetcher;
