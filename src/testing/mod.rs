//! Store fixtures for testing code built on the cache client.
//!
//! - [`ScriptedStore`]: in-memory store with scripted faults (lost batch
//!   races, registration errors, batch creation failures, an unreachable
//!   store) and a log of executed batch sizes.
//! - [`RecordingStore`]: wraps any store and records every call, for
//!   asserting that a request never reached the store.
//!
//! # Example
//!
//! ```rust,ignore
//! use ignite_cache::testing::ScriptedStore;
//! use ignite_cache::{CacheConfig, IgniteCache, PutStringRequest};
//! use std::sync::Arc;
//!
//! let store = ScriptedStore::new();
//! let cache = IgniteCache::new(CacheConfig::new().with_batch_size(2), Arc::new(store.clone()))?;
//!
//! // Lose the batch race four times; the fifth attempt lands.
//! store.fail_next_registrations(4);
//! let fut = cache.put_string_async(&PutStringRequest::new().with_key("k").with_value("v"))?;
//! ```

mod recording;
mod scripted;

#[cfg(test)]
mod utils;

#[cfg(test)]
mod pipeline_tests;

pub use recording::RecordingStore;
pub use scripted::ScriptedStore;
