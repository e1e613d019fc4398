//! Namespaced cache client over a key-value/sorted-set store.
//!
//! This crate provides a caching client that:
//! - Stores strings and JSON-encoded entities as single values, scored
//!   collections and field maps
//! - Applies an optional namespace prefix to every key
//! - Pipelines asynchronous mutations through a shared batch that is
//!   swapped out lock-free once it reaches the configured size
//! - Scans the keyspace by regular expression and decodes every match
//!
//! # Features
//!
//! - Synchronous and `_async` forms of every mutation; the latter resolve
//!   with the request's mutation id once the batch executes
//! - Bounded retry of the race between an enqueue and a batch swap
//! - Pluggable entity codecs (JSON, LZ4-framed JSON)
//! - Store health probing and Prometheus-style metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use ignite_cache::{CacheConfig, IgniteCache, MemoryStore, PutStringRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::new()
//!         .with_namespace("app")
//!         .with_batch_size(100);
//!     let cache = IgniteCache::new(config, Arc::new(MemoryStore::new()))?;
//!
//!     // Immediate write, stored under "app:user:123"
//!     cache
//!         .put_string(&PutStringRequest::new().with_key("user:123").with_value("Alice"))
//!         .await?;
//!
//!     // Pipelined write, resolved when its batch executes
//!     let pending = cache.put_string_async(
//!         &PutStringRequest::new()
//!             .with_key("user:456")
//!             .with_value("Bob")
//!             .with_mutation_id("m-1"),
//!     )?;
//!
//!     // Flush the partial batch so the future resolves
//!     cache.shutdown().await;
//!     assert_eq!(pending.await?.as_deref(), Some("m-1"));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                IgniteCache                  │
//! │  strings · entities · scored · maps · scan  │
//! └─────────────────────────────────────────────┘
//!          │                 │              │
//!          ▼                 ▼              ▼
//!   ┌────────────┐   ┌──────────────┐  ┌──────────┐
//!   │ immediate  │   │BatchPipeline │  │ScanDecoder│
//!   │ store calls│   │ (ArcSwap)    │  │          │
//!   └────────────┘   └──────────────┘  └──────────┘
//!          │                 │              │
//!          └────────┬────────┴──────────────┘
//!                   ▼
//!            dyn StoreFacade
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod namespace;
pub mod pipeline;
pub mod request;
pub mod scan;
pub mod scored;
pub mod store;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use cache::IgniteCache;
pub use config::{CacheConfig, HealthConfig, MAX_BATCH_RETRIES};
pub use error::{CodecError, Error, PipelineError, Result, StoreError, ValidationError};
pub use types::{RangeSpec, ScoredEntry};

pub use request::{
    AddScoredEntityRequest, AddScoredRequest, AddScoredStringRequest, DeleteEntryRequest,
    DeleteMapOfEntitiesRequest, GetEntityRequest, GetMapOfEntitiesRequest, GetRequest,
    GetScoredEntitiesRequest, GetScoredRequest, GetScoredStringsRequest, GetStringRequest,
    MapFieldsRequest, PutEntityRequest, PutMapOfEntitiesRequest, PutRequest, PutStringRequest,
    Validate,
};

// Store seam
pub use store::{
    BatchCommand, BatchOutcome, BatchReply, MemoryStore, ScanPage, StoreBatch, StoreFacade,
    StoreResult,
};

pub use codec::{CodecRegistry, JsonCodec, Lz4JsonCodec, ValueCodec};
pub use health::{HealthMonitor, HEALTH_METRIC_NAME, HEALTH_MONITOR_NAME};
pub use namespace::KeyNamespacer;
pub use pipeline::{BatchPipeline, MutationFuture};
pub use scan::ScanDecoder;
pub use scored::ScoredCollectionAdapter;

pub use metrics::{
    CacheMetrics, Counter, Histogram, HistogramSnapshot, HistogramTimer, LabeledCounter,
    MetricsSnapshot, BATCH_SIZE_BUCKETS, LATENCY_BUCKETS,
};

pub use testing::{RecordingStore, ScriptedStore};
