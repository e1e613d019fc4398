//! Fault-injecting store for exercising the batch pipeline.
//!
//! [`ScriptedStore`] wraps a [`MemoryStore`] and fails selected calls on
//! demand: batch registrations can lose the batch race or hit an arbitrary
//! store error, batch creation can fail, and every immediate call can be
//! made to fail as if the store were unreachable. Scan pages can also be
//! scripted verbatim to exercise cursor handling, and a callback can run
//! inside the next batch creation to interleave work with a rotation.

use crate::error::StoreError;
use crate::store::{
    BatchCommand, BatchOutcome, MemoryBatch, MemoryStore, ReplyReceiver, ScanPage, StoreBatch,
    StoreFacade, StoreResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type CreationHook = Box<dyn FnOnce() + Send>;

/// One-shot callback run inside `create_batch`.
#[derive(Default)]
struct BatchCreationHook(Mutex<Option<CreationHook>>);

impl std::fmt::Debug for BatchCreationHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BatchCreationHook")
            .field(&self.0.lock().is_some())
            .finish()
    }
}

/// Faults queued against a [`ScriptedStore`].
#[derive(Debug, Default)]
struct FaultPlan {
    races: AtomicU32,
    register_error: Mutex<Option<StoreError>>,
    creation_failures: AtomicU32,
    unavailable: Mutex<Option<StoreError>>,
    scan_pages: Mutex<VecDeque<ScanPage>>,
    on_creation: BatchCreationHook,
}

impl FaultPlan {
    /// Consume one unit from a countdown, returning whether one was left.
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_available(&self) -> StoreResult<()> {
        match &*self.unavailable.lock() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct BatchLog {
    created: AtomicU64,
    executed: Mutex<Vec<usize>>,
}

/// In-memory store with scripted failures.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStore {
    inner: MemoryStore,
    plan: Arc<FaultPlan>,
    log: Arc<BatchLog>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for asserting on stored state.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Make the next `n` batch registrations fail with
    /// [`StoreError::BatchAlreadyExecuted`].
    pub fn fail_next_registrations(&self, n: u32) {
        self.plan.races.store(n, Ordering::Release);
    }

    /// Make the next batch registration fail with `error`.
    pub fn fail_next_registration_with(&self, error: StoreError) {
        *self.plan.register_error.lock() = Some(error);
    }

    /// Make the next `n` batch creations fail.
    pub fn fail_next_batch_creations(&self, n: u32) {
        self.plan.creation_failures.store(n, Ordering::Release);
    }

    /// Fail every immediate call with `error` until cleared with `None`.
    pub fn set_unavailable(&self, error: Option<StoreError>) {
        *self.plan.unavailable.lock() = error;
    }

    /// Serve `pages` in order from the next pattern scans instead of the keyspace.
    pub fn script_scan_pages(&self, pages: impl IntoIterator<Item = ScanPage>) {
        self.plan.scan_pages.lock().extend(pages);
    }

    /// Run `hook` inside the next `create_batch` call, before the batch exists.
    ///
    /// The pipeline opens the replacement batch while rotating, so the hook
    /// runs after the rotating caller committed to a swap and before it happens.
    pub fn on_next_batch_creation(&self, hook: impl FnOnce() + Send + 'static) {
        *self.plan.on_creation.0.lock() = Some(Box::new(hook));
    }

    /// Batches handed out so far.
    pub fn batches_created(&self) -> u64 {
        self.log.created.load(Ordering::Acquire)
    }

    /// Sizes of the batches that executed, in completion order.
    pub fn executed_batches(&self) -> Vec<usize> {
        self.log.executed.lock().clone()
    }

    /// Total operations carried by executed batches.
    pub fn executed_operations(&self) -> usize {
        self.log.executed.lock().iter().sum()
    }
}

#[async_trait]
impl StoreFacade for ScriptedStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.plan.check_available()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        self.plan.check_available()?;
        self.inner.set(key, value, ttl).await
    }

    async fn compare_and_set(&self, key: &str, expected: Bytes, value: Bytes) -> StoreResult<bool> {
        self.plan.check_available()?;
        self.inner.compare_and_set(key, expected, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.plan.check_available()?;
        self.inner.delete(key).await
    }

    async fn scored_add(&self, key: &str, score: f64, value: Bytes) -> StoreResult<bool> {
        self.plan.check_available()?;
        self.inner.scored_add(key, score, value).await
    }

    async fn scored_range(
        &self,
        key: &str,
        start: i64,
        end: i64,
        reversed: bool,
    ) -> StoreResult<Vec<(f64, Bytes)>> {
        self.plan.check_available()?;
        self.inner.scored_range(key, start, end, reversed).await
    }

    async fn map_put_all(&self, key: &str, entries: HashMap<String, Bytes>) -> StoreResult<()> {
        self.plan.check_available()?;
        self.inner.map_put_all(key, entries).await
    }

    async fn map_get_all(
        &self,
        key: &str,
        fields: &HashSet<String>,
    ) -> StoreResult<HashMap<String, Bytes>> {
        self.plan.check_available()?;
        self.inner.map_get_all(key, fields).await
    }

    async fn map_read_all(&self, key: &str) -> StoreResult<HashMap<String, Bytes>> {
        self.plan.check_available()?;
        self.inner.map_read_all(key).await
    }

    async fn map_remove_fields(&self, key: &str, fields: &HashSet<String>) -> StoreResult<u64> {
        self.plan.check_available()?;
        self.inner.map_remove_fields(key, fields).await
    }

    async fn map_delete(&self, key: &str) -> StoreResult<bool> {
        self.plan.check_available()?;
        self.inner.map_delete(key).await
    }

    async fn pattern_scan(
        &self,
        cursor: u64,
        limit: usize,
        pattern: &str,
    ) -> StoreResult<ScanPage> {
        self.plan.check_available()?;
        if let Some(page) = self.plan.scan_pages.lock().pop_front() {
            return Ok(page);
        }
        self.inner.pattern_scan(cursor, limit, pattern).await
    }

    fn create_batch(&self) -> StoreResult<Arc<dyn StoreBatch>> {
        let hook = self.plan.on_creation.0.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        if FaultPlan::take(&self.plan.creation_failures) {
            return Err(StoreError::Backend("scripted batch creation failure".into()));
        }
        self.log.created.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(ScriptedBatch {
            inner: self.inner.batch(),
            plan: self.plan.clone(),
            log: self.log.clone(),
        }))
    }
}

struct ScriptedBatch {
    inner: MemoryBatch,
    plan: Arc<FaultPlan>,
    log: Arc<BatchLog>,
}

#[async_trait]
impl StoreBatch for ScriptedBatch {
    fn register(&self, command: BatchCommand) -> StoreResult<ReplyReceiver> {
        if FaultPlan::take(&self.plan.races) {
            return Err(StoreError::BatchAlreadyExecuted);
        }
        if let Some(err) = self.plan.register_error.lock().take() {
            return Err(err);
        }
        self.inner.register(command)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn execute(&self) -> StoreResult<BatchOutcome> {
        let outcome = self.inner.execute().await?;
        self.log.executed.lock().push(outcome.executed);
        Ok(outcome)
    }
}
