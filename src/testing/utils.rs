use crate::config::CacheConfig;
use crate::store::StoreFacade;
use crate::IgniteCache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Build a client over `store` with a small batch size and an optional namespace.
pub(crate) fn test_cache(
    store: Arc<dyn StoreFacade>,
    batch_size: u64,
    namespace: Option<&str>,
) -> IgniteCache {
    let mut config = CacheConfig::new().with_batch_size(batch_size);
    if let Some(ns) = namespace {
        config = config.with_namespace(ns);
    }
    IgniteCache::new(config, store).expect("test cache config is valid")
}

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call from every test.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}
