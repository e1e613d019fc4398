//! Store wrapper that records every interaction.

use crate::store::{
    BatchCommand, BatchOutcome, ReplyReceiver, ScanPage, StoreBatch, StoreFacade, StoreResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Forwards to another store and logs the name and key of each call.
///
/// Batch creation is logged as `create_batch`; registrations against the
/// handed-out batches as `register:<command>`.
#[derive(Clone)]
pub struct RecordingStore {
    inner: Arc<dyn StoreFacade>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<dyn StoreFacade>) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Calls recorded so far, as `name` or `name:key`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn interactions(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, name: &str, key: &str) {
        self.calls.lock().push(format!("{}:{}", name, key));
    }
}

impl std::fmt::Debug for RecordingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingStore")
            .field("interactions", &self.interactions())
            .finish()
    }
}

#[async_trait]
impl StoreFacade for RecordingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.record("get", key);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        self.record("set", key);
        self.inner.set(key, value, ttl).await
    }

    async fn compare_and_set(&self, key: &str, expected: Bytes, value: Bytes) -> StoreResult<bool> {
        self.record("compare_and_set", key);
        self.inner.compare_and_set(key, expected, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.record("delete", key);
        self.inner.delete(key).await
    }

    async fn scored_add(&self, key: &str, score: f64, value: Bytes) -> StoreResult<bool> {
        self.record("scored_add", key);
        self.inner.scored_add(key, score, value).await
    }

    async fn scored_range(
        &self,
        key: &str,
        start: i64,
        end: i64,
        reversed: bool,
    ) -> StoreResult<Vec<(f64, Bytes)>> {
        self.record("scored_range", key);
        self.inner.scored_range(key, start, end, reversed).await
    }

    async fn map_put_all(&self, key: &str, entries: HashMap<String, Bytes>) -> StoreResult<()> {
        self.record("map_put_all", key);
        self.inner.map_put_all(key, entries).await
    }

    async fn map_get_all(
        &self,
        key: &str,
        fields: &HashSet<String>,
    ) -> StoreResult<HashMap<String, Bytes>> {
        self.record("map_get_all", key);
        self.inner.map_get_all(key, fields).await
    }

    async fn map_read_all(&self, key: &str) -> StoreResult<HashMap<String, Bytes>> {
        self.record("map_read_all", key);
        self.inner.map_read_all(key).await
    }

    async fn map_remove_fields(&self, key: &str, fields: &HashSet<String>) -> StoreResult<u64> {
        self.record("map_remove_fields", key);
        self.inner.map_remove_fields(key, fields).await
    }

    async fn map_delete(&self, key: &str) -> StoreResult<bool> {
        self.record("map_delete", key);
        self.inner.map_delete(key).await
    }

    async fn pattern_scan(
        &self,
        cursor: u64,
        limit: usize,
        pattern: &str,
    ) -> StoreResult<ScanPage> {
        self.record("pattern_scan", pattern);
        self.inner.pattern_scan(cursor, limit, pattern).await
    }

    fn create_batch(&self) -> StoreResult<Arc<dyn StoreBatch>> {
        self.calls.lock().push("create_batch".to_string());
        Ok(Arc::new(RecordingBatch {
            inner: self.inner.create_batch()?,
            calls: self.calls.clone(),
        }))
    }
}

struct RecordingBatch {
    inner: Arc<dyn StoreBatch>,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StoreBatch for RecordingBatch {
    fn register(&self, command: BatchCommand) -> StoreResult<ReplyReceiver> {
        self.calls
            .lock()
            .push(format!("register:{}:{}", command.name(), command.key()));
        self.inner.register(command)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn execute(&self) -> StoreResult<BatchOutcome> {
        self.calls.lock().push("execute".to_string());
        self.inner.execute().await
    }
}
