//! Store health probing.

use crate::cache::IgniteCache;
use crate::request::{DeleteEntryRequest, PutStringRequest};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

/// Name reported by the store health monitor.
pub const HEALTH_MONITOR_NAME: &str = "REDIS_HEALTH_MONITOR";

/// Gauge name under which the store health is published.
pub const HEALTH_METRIC_NAME: &str = "REDIS_HEALTH_GUAGE";

const PROBE_KEY: &str = "hello";
const PROBE_VALUE: &str = "world";

/// A component that can report whether its backing service is usable.
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Last known health, refreshed first when `force` is set.
    async fn is_healthy(&self, force: bool) -> bool;

    /// Override the recorded health.
    fn set_healthy(&self, healthy: bool);

    fn monitor_name(&self) -> &'static str;

    fn metric_name(&self) -> &'static str;

    /// Whether the process should restart once this monitor reports unhealthy.
    fn needs_restart_on_failure(&self) -> bool;

    fn is_enabled(&self) -> bool;
}

/// Last observed health. Starts healthy.
#[derive(Debug)]
pub struct HealthState {
    healthy: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
        }
    }
}

impl HealthState {
    pub fn get(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }
}

impl IgniteCache {
    /// Write and delete a probe key outside the namespace.
    async fn probe(&self) -> crate::Result<()> {
        self.put_string(
            &PutStringRequest::new()
                .with_key(PROBE_KEY)
                .with_value(PROBE_VALUE)
                .with_namespace_enabled(false),
        )
        .await?;
        self.delete(
            &DeleteEntryRequest::new()
                .with_key(PROBE_KEY)
                .with_namespace_enabled(false),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HealthMonitor for IgniteCache {
    async fn is_healthy(&self, force: bool) -> bool {
        if force {
            match self.probe().await {
                Ok(()) => {
                    debug!("Store health probe succeeded");
                    self.health.set(true);
                }
                Err(e) => {
                    error!(error = %e, "Store health probe failed");
                    self.health.set(false);
                }
            }
        }
        self.health.get()
    }

    fn set_healthy(&self, healthy: bool) {
        self.health.set(healthy);
    }

    fn monitor_name(&self) -> &'static str {
        HEALTH_MONITOR_NAME
    }

    fn metric_name(&self) -> &'static str {
        HEALTH_METRIC_NAME
    }

    fn needs_restart_on_failure(&self) -> bool {
        self.config().health.needs_restart_on_failure
    }

    fn is_enabled(&self) -> bool {
        self.config().health.enabled
    }
}
