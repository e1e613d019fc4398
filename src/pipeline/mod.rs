//! Lock-free batching of asynchronous mutations.
//!
//! Callers register commands against a shared current batch. Each
//! successful registration bumps a counter; the caller that moves the
//! counter onto a multiple of `batch_size` retires the batch once it holds
//! at least `batch_size` operations, publishes a fresh one, and hands the
//! retired batch to the runtime for execution.
//!
//! ```text
//!  enqueue ──► load current ──► register ──ok──► counter += 1 ──► count % size == 0 ?
//!                 ▲                 │                                   │ yes
//!                 │   already       │                                   ▼
//!                 └── executed / ◄──┘                         len(current) >= size ?
//!                     no batch                                CAS current → fresh
//!                   (≤ 5 attempts)                            CAS counter size → 0
//!                                                             spawn execute(retired)
//! ```
//!
//! No lock is held across the swap. A registration that lands on a batch
//! after it started executing fails with
//! [`StoreError::BatchAlreadyExecuted`](crate::StoreError) and is retried
//! against whatever batch is current.
//!
//! Every enqueue holds a task tracker token, so shutdown waits for any
//! rotation in progress. An enqueue that finds the pipeline closed on its
//! way out drains whatever batch is still published.

mod future;

pub use future::MutationFuture;

use crate::config::MAX_BATCH_RETRIES;
use crate::error::{PipelineError, Result};
use crate::metrics::CacheMetrics;
use crate::store::{BatchCommand, StoreBatch, StoreFacade};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// A store batch tagged with the generation it was created in.
struct BatchHandle {
    generation: u64,
    batch: Arc<dyn StoreBatch>,
}

/// Accumulates mutations into shared batches and executes them off the caller's path.
pub struct BatchPipeline {
    store: Arc<dyn StoreFacade>,
    current: ArcSwapOption<BatchHandle>,
    counter: AtomicU64,
    generations: AtomicU64,
    batch_size: u64,
    max_retries: u32,
    metrics: Arc<CacheMetrics>,
    runtime: Handle,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl BatchPipeline {
    /// Create a pipeline and open its first batch.
    ///
    /// Failing to open the first batch is not fatal: the first enqueue
    /// treats the missing batch like a race and installs one.
    pub fn new(
        store: Arc<dyn StoreFacade>,
        batch_size: u64,
        metrics: Arc<CacheMetrics>,
        runtime: Handle,
    ) -> Self {
        let pipeline = Self {
            store,
            current: ArcSwapOption::empty(),
            counter: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            batch_size: batch_size.max(1),
            max_retries: MAX_BATCH_RETRIES,
            metrics,
            runtime,
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        };
        pipeline.install_if_absent();
        pipeline
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Operations registered against the current batch.
    pub fn pending(&self) -> usize {
        match &*self.current.load() {
            Some(handle) => handle.batch.len(),
            None => 0,
        }
    }

    /// Retired batches still executing, plus enqueues in progress.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Register `command` against the current batch.
    ///
    /// Only the batch race (batch already executed, or no live batch) is
    /// retried, up to the retry bound. Any other store error is returned
    /// immediately.
    pub fn enqueue(
        &self,
        command: BatchCommand,
        mutation_id: Option<String>,
    ) -> Result<MutationFuture> {
        // Keeps shutdown's wait open until this call has spawned whatever it retired.
        let _in_progress = self.tracker.token();
        let result = self.register(command, mutation_id);

        fence(Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.drain("enqueue overlapped shutdown");
        }
        result
    }

    /// Retire the current batch, execute it, and wait for every retired
    /// batch to finish. Later enqueues fail with [`PipelineError::ShutDown`].
    pub async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            fence(Ordering::SeqCst);
            self.drain("flushing tail batch");
            self.counter.store(0, Ordering::Release);
            self.tracker.close();
        }
        self.tracker.wait().await;
        info!("Batch pipeline shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Generation of the batch currently accepting operations.
    pub fn current_generation(&self) -> Option<u64> {
        self.current.load().as_ref().map(|handle| handle.generation)
    }

    fn register(&self, command: BatchCommand, mutation_id: Option<String>) -> Result<MutationFuture> {
        let name = command.name();
        let conditional = command.is_conditional();
        let mut attempts = 0;

        let reply = loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(PipelineError::ShutDown.into());
            }
            if attempts == self.max_retries {
                self.metrics.retries_exhausted.inc();
                warn!(command = name, key = command.key(), attempts, "Giving up on batch registration");
                return Err(PipelineError::RetriesExhausted { attempts }.into());
            }
            attempts += 1;

            let Some(handle) = self.current.load_full() else {
                self.metrics.race_retries.inc();
                debug!(attempt = attempts, "No active batch, installing a fresh one");
                self.install_if_absent();
                continue;
            };

            match handle.batch.register(command.clone()) {
                Ok(reply) => break reply,
                Err(e) if e.is_retryable_race() => {
                    self.metrics.race_retries.inc();
                    trace!(
                        generation = handle.generation,
                        attempt = attempts,
                        error = %e,
                        "Lost batch race, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.metrics.record_enqueue(name);
        self.advance();
        Ok(MutationFuture::new(
            mutation_id,
            conditional,
            reply,
            Some(self.metrics.clone()),
        ))
    }

    fn advance(&self) {
        let count = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        if count % self.batch_size == 0 {
            self.rotate(count);
        }
    }

    /// Retire the current batch if it holds a full batch of operations.
    ///
    /// Late registrations can move the counter past a multiple while the
    /// batch is still short, so the batch length decides, not the count.
    fn rotate(&self, count: u64) {
        let Some(current) = self.current.load_full() else {
            return;
        };
        let pending = current.batch.len() as u64;
        if pending < self.batch_size {
            trace!(generation = current.generation, count, pending, "Batch still short, not retiring");
            return;
        }

        let fresh = self.open_batch();
        let expected = Some(current);
        let previous = self.current.compare_and_swap(&expected, fresh);
        let won = matches!(
            (&*previous, &expected),
            (Some(prev), Some(cur)) if Arc::ptr_eq(prev, cur)
        );
        if !won {
            trace!(count, "Batch already retired elsewhere");
            return;
        }
        // Late incrementers may already have moved the counter past the threshold.
        let _ = self.counter.compare_exchange(
            self.batch_size,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        if let Some(retired) = expected {
            debug!(
                generation = retired.generation,
                count,
                pending,
                "Threshold reached, retiring batch"
            );
            self.spawn_execute(retired);
        }
    }

    /// Take whatever batch is published and execute it.
    fn drain(&self, reason: &'static str) {
        if let Some(tail) = self.current.swap(None) {
            debug!(
                generation = tail.generation,
                pending = tail.batch.len(),
                reason,
                "Draining batch"
            );
            self.spawn_execute(tail);
        }
    }

    fn open_batch(&self) -> Option<Arc<BatchHandle>> {
        match self.store.create_batch() {
            Ok(batch) => Some(Arc::new(BatchHandle {
                generation: self.generations.fetch_add(1, Ordering::Relaxed),
                batch,
            })),
            Err(e) => {
                error!(error = %e, "Failed to open batch");
                None
            }
        }
    }

    fn install_if_absent(&self) {
        if self.current.load().is_some() {
            return;
        }
        if let Some(fresh) = self.open_batch() {
            let generation = fresh.generation;
            let previous = self
                .current
                .compare_and_swap(&None::<Arc<BatchHandle>>, Some(fresh));
            if previous.is_none() {
                debug!(generation, "Installed batch");
            }
        }
    }

    fn spawn_execute(&self, handle: Arc<BatchHandle>) {
        let metrics = self.metrics.clone();
        self.tracker.spawn_on(
            async move {
                let size = handle.batch.len();
                let started = Instant::now();
                match handle.batch.execute().await {
                    Ok(outcome) => {
                        metrics.record_batch(size, Some(outcome.failed), started.elapsed());
                        debug!(
                            generation = handle.generation,
                            executed = outcome.executed,
                            failed = outcome.failed,
                            "Executed batch"
                        );
                    }
                    Err(e) => {
                        metrics.record_batch(size, None, started.elapsed());
                        error!(generation = handle.generation, size, error = %e, "Batch execution failed");
                    }
                }
            },
            &self.runtime,
        );
    }
}

impl std::fmt::Debug for BatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPipeline")
            .field("batch_size", &self.batch_size)
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .field("generation", &self.current_generation())
            .field("pending", &self.pending())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
