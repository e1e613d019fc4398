//! Basic usage of the cache client over the in-memory store.
//!
//! Run with `RUST_LOG=debug` to see the pipeline swapping batches.

use ignite_cache::{
    AddScoredStringRequest, CacheConfig, GetScoredStringsRequest, HealthMonitor, IgniteCache,
    MemoryStore, PutRequest, PutStringRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = CacheConfig::new().with_namespace("demo").with_batch_size(4);
    let cache = IgniteCache::new(config, Arc::new(MemoryStore::new()))?;

    cache
        .put_string(
            &PutStringRequest::new()
                .with_key("greeting")
                .with_value("hello")
                .with_ttl(Duration::from_secs(60)),
        )
        .await?;
    println!("greeting = {:?}", cache.get_string_by_key("greeting").await?);

    cache
        .put_entity(
            &PutRequest::<Profile>::new().with_key("profile:1").with_value(Profile {
                name: "Ada".to_string(),
                visits: 3,
            }),
        )
        .await?;
    let profile: Option<Profile> = cache.get_entity_by_key("profile:1").await?;
    println!("profile = {:?}", profile);

    // Ten pipelined writes: two full batches of four, two left pending.
    let mut pending = Vec::new();
    for i in 0..10 {
        pending.push(cache.add_scored_string_async(
            &AddScoredStringRequest::new()
                .with_key("leaderboard")
                .with_score(i as f64)
                .with_value(format!("player-{}", i))
                .with_mutation_id(format!("m-{}", i)),
        )?);
    }
    println!("pending after enqueue = {}", cache.pending_operations());

    cache.shutdown().await;
    for fut in pending {
        fut.await?;
    }

    let top = cache
        .get_scored_strings(
            &GetScoredStringsRequest::new()
                .with_key("leaderboard")
                .with_start_index(0)
                .with_end_index(2)
                .from_reverse_index(),
        )
        .await?;
    println!("top three = {:?}", top);

    println!("healthy = {}", cache.is_healthy(true).await);
    println!("{}", cache.metrics().to_prometheus());
    Ok(())
}
