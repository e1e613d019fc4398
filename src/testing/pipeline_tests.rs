//! Batch pipeline behaviour under lost races, store faults and concurrency.
//!
//! These tests drive [`BatchPipeline`] against a [`ScriptedStore`] and check:
//! - bounded retry of the batch race and its exhaustion
//! - immediate propagation of unrelated store errors
//! - recovery from a missing batch
//! - batch sizing and exactly-once execution under concurrent enqueues
//! - registrations that slip in while a batch is being rotated
//! - shutdown overlapping a rotation

#[cfg(test)]
mod tests {
    use crate::error::{Error, PipelineError, StoreError};
    use crate::metrics::CacheMetrics;
    use crate::pipeline::BatchPipeline;
    use crate::store::{BatchCommand, StoreFacade};
    use crate::testing::utils::{init_tracing, wait_for};
    use crate::pipeline::MutationFuture;
    use crate::testing::ScriptedStore;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn pipeline(store: &ScriptedStore, batch_size: u64) -> (BatchPipeline, Arc<CacheMetrics>) {
        let metrics = Arc::new(CacheMetrics::new());
        let pipeline = BatchPipeline::new(
            Arc::new(store.clone()),
            batch_size,
            metrics.clone(),
            Handle::current(),
        );
        (pipeline, metrics)
    }

    fn set(key: impl Into<String>) -> BatchCommand {
        BatchCommand::Set {
            key: key.into(),
            value: Bytes::from_static(b"v"),
            ttl: None,
        }
    }

    #[tokio::test]
    async fn test_four_lost_races_then_success() {
        init_tracing();
        let store = ScriptedStore::new();
        let (pipeline, metrics) = pipeline(&store, 1);

        store.fail_next_registrations(4);
        let fut = pipeline.enqueue(set("k"), Some("m-1".into())).unwrap();

        assert_eq!(fut.await.unwrap().as_deref(), Some("m-1"));
        assert_eq!(metrics.race_retries.get(), 4);
        assert_eq!(metrics.retries_exhausted.get(), 0);
        assert!(store.inner().get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_five_lost_races_exhaust_retries() {
        let store = ScriptedStore::new();
        let (pipeline, metrics) = pipeline(&store, 10);

        store.fail_next_registrations(5);
        let err = pipeline.enqueue(set("k"), Some("m-1".into())).unwrap_err();

        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::RetriesExhausted { attempts: 5 })
        ));
        assert_eq!(metrics.retries_exhausted.get(), 1);
        // Nothing was registered and the counter did not move.
        assert_eq!(pipeline.pending(), 0);

        let fut = pipeline.enqueue(set("k2"), None).unwrap();
        assert_eq!(pipeline.pending(), 1);
        pipeline.shutdown().await;
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_race_error_propagates_without_retry() {
        let store = ScriptedStore::new();
        let (pipeline, metrics) = pipeline(&store, 10);

        store.fail_next_registration_with(StoreError::Backend("connection reset".into()));
        let err = pipeline.enqueue(set("k"), None).unwrap_err();

        assert!(matches!(err, Error::Store(StoreError::Backend(_))));
        assert_eq!(metrics.race_retries.get(), 0);
        assert_eq!(metrics.retries_exhausted.get(), 0);
    }

    #[tokio::test]
    async fn test_missing_batch_is_installed_on_enqueue() {
        let store = ScriptedStore::new();
        store.fail_next_batch_creations(1);
        let (pipeline, metrics) = pipeline(&store, 10);
        assert_eq!(store.batches_created(), 0);

        let fut = pipeline.enqueue(set("k"), None).unwrap();
        assert_eq!(store.batches_created(), 1);
        assert_eq!(metrics.race_retries.get(), 1);

        pipeline.shutdown().await;
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn test_persistent_batch_creation_failure_exhausts_retries() {
        let store = ScriptedStore::new();
        store.fail_next_batch_creations(100);
        let (pipeline, _) = pipeline(&store, 10);

        assert!(matches!(
            pipeline.enqueue(set("k"), None),
            Err(Error::Pipeline(PipelineError::RetriesExhausted { attempts: 5 }))
        ));
    }

    #[tokio::test]
    async fn test_failed_rotation_recovers() {
        let store = ScriptedStore::new();
        let (pipeline, _) = pipeline(&store, 2);

        let a = pipeline.enqueue(set("a"), None).unwrap();
        store.fail_next_batch_creations(1);
        // Reaching the threshold retires the batch but no fresh one can be opened.
        let b = pipeline.enqueue(set("b"), None).unwrap();
        a.await.unwrap();
        b.await.unwrap();

        let c = pipeline.enqueue(set("c"), None).unwrap();
        let d = pipeline.enqueue(set("d"), None).unwrap();
        c.await.unwrap();
        d.await.unwrap();
        assert_eq!(store.executed_batches(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_batches_carry_batch_size_operations() {
        let store = ScriptedStore::new();
        let (pipeline, metrics) = pipeline(&store, 4);

        let mut futures = Vec::new();
        for i in 0..10 {
            futures.push(pipeline.enqueue(set(format!("k{}", i)), Some(i.to_string())).unwrap());
        }
        assert_eq!(pipeline.pending(), 2);

        pipeline.shutdown().await;
        for (i, fut) in futures.into_iter().enumerate() {
            assert_eq!(fut.await.unwrap(), Some(i.to_string()));
        }

        // Two full batches and the tail flushed on shutdown.
        assert_eq!(store.executed_batches(), vec![4, 4, 2]);
        let snap = metrics.snapshot();
        assert_eq!(snap.batches_executed, 3);
        assert_eq!(snap.operations_enqueued, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueues_execute_exactly_once() {
        init_tracing();
        const TASKS: usize = 8;
        const PER_TASK: usize = 250;

        let store = ScriptedStore::new();
        let (pipeline, _) = pipeline(&store, 16);
        let pipeline = Arc::new(pipeline);

        let mut handles = Vec::new();
        for t in 0..TASKS {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                let mut futures = Vec::with_capacity(PER_TASK);
                for i in 0..PER_TASK {
                    let id = format!("{}-{}", t, i);
                    futures.push(pipeline.enqueue(set(id.clone()), Some(id)).unwrap());
                }
                futures
            }));
        }

        let mut futures = Vec::new();
        for handle in handles {
            futures.extend(handle.await.unwrap());
        }

        // Every batch retired by a rotation carries a full batch.
        assert!(wait_for(|| pipeline.in_flight() == 0, Duration::from_secs(5)).await);
        let rotated = store.executed_batches();
        assert!(!rotated.is_empty());
        assert!(
            rotated.iter().all(|&size| size >= 16),
            "short batch executed: {:?}",
            rotated
        );

        pipeline.shutdown().await;

        for fut in futures {
            assert!(fut.await.unwrap().is_some());
        }
        assert_eq!(store.executed_operations(), TASKS * PER_TASK);
        assert_eq!(store.inner().key_count(), TASKS * PER_TASK);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_batches() {
        let store = ScriptedStore::new();
        let (pipeline, _) = pipeline(&store, 1);

        for i in 0..5 {
            let _ = pipeline.enqueue(set(format!("k{}", i)), None).unwrap();
        }
        pipeline.shutdown().await;

        assert_eq!(pipeline.in_flight(), 0);
        assert!(wait_for(|| store.executed_operations() == 5, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_registration_during_rotation_never_shortens_a_batch() {
        let store = ScriptedStore::new();
        let (pipeline, _) = pipeline(&store, 2);
        let pipeline = Arc::new(pipeline);
        let late: Arc<Mutex<Vec<MutationFuture>>> = Arc::new(Mutex::new(Vec::new()));

        let a = pipeline.enqueue(set("a"), Some("a".into())).unwrap();

        // Another caller registers on the retiring batch while the rotation
        // opens its replacement, pushing the counter past the threshold.
        let weak = Arc::downgrade(&pipeline);
        let sink = late.clone();
        store.on_next_batch_creation(move || {
            if let Some(pipeline) = weak.upgrade() {
                sink.lock()
                    .push(pipeline.enqueue(set("late"), Some("late".into())).unwrap());
            }
        });
        let b = pipeline.enqueue(set("b"), Some("b".into())).unwrap();
        assert!(wait_for(|| store.executed_batches() == vec![3], Duration::from_secs(1)).await);

        // The counter hits the next multiple with a single operation queued.
        let d = pipeline.enqueue(set("d"), Some("d".into())).unwrap();
        assert_eq!(pipeline.pending(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.executed_batches(), vec![3]);

        let e = pipeline.enqueue(set("e"), Some("e".into())).unwrap();
        let f = pipeline.enqueue(set("f"), Some("f".into())).unwrap();
        assert!(wait_for(|| store.executed_operations() == 6, Duration::from_secs(1)).await);
        assert_eq!(store.executed_batches(), vec![3, 3]);

        let late = late.lock().pop().unwrap();
        for (fut, id) in [(a, "a"), (b, "b"), (late, "late"), (d, "d"), (e, "e"), (f, "f")] {
            assert_eq!(fut.await.unwrap().as_deref(), Some(id));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_overlapping_rotation_drains_everything() {
        init_tracing();
        let store = ScriptedStore::new();
        let (pipeline, _) = pipeline(&store, 2);
        let pipeline = Arc::new(pipeline);

        let a = pipeline.enqueue(set("a"), Some("a".into())).unwrap();

        // Hold the rotation between its decision to retire and the swap
        // until shutdown has closed the pipeline and taken the tail.
        let entered = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        {
            let weak = Arc::downgrade(&pipeline);
            let entered = entered.clone();
            let release = release.clone();
            store.on_next_batch_creation(move || {
                entered.store(true, Ordering::SeqCst);
                let Some(pipeline) = weak.upgrade() else {
                    return;
                };
                while !(pipeline.is_closed() && release.load(Ordering::SeqCst)) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
        }

        let rotating = {
            let pipeline = pipeline.clone();
            tokio::task::spawn_blocking(move || pipeline.enqueue(set("b"), Some("b".into())))
        };
        assert!(wait_for(|| entered.load(Ordering::SeqCst), Duration::from_secs(5)).await);

        let closing = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.shutdown().await })
        };
        assert!(wait_for(|| pipeline.is_closed(), Duration::from_secs(5)).await);

        // Shutdown may not finish while the rotating enqueue is still running.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closing.is_finished());

        release.store(true, Ordering::SeqCst);
        let b = rotating.await.unwrap().unwrap();
        closing.await.unwrap();

        assert_eq!(a.await.unwrap().as_deref(), Some("a"));
        assert_eq!(b.await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.executed_operations(), 2);
        assert_eq!(pipeline.current_generation(), None);
        assert!(matches!(
            pipeline.enqueue(set("c"), None),
            Err(Error::Pipeline(PipelineError::ShutDown))
        ));
    }
}
