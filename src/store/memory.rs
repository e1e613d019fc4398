//! In-process store backed by an ordered keyspace.
//!
//! Mirrors the semantics of a remote key-value/sorted-set server closely
//! enough to run the whole client against it: per-key TTL, score-ordered
//! collections with native position indexing, hash maps, cursor-based
//! pattern scans and single-shot batches.

use super::{
    BatchCommand, BatchOutcome, BatchReply, ReplyReceiver, ScanPage, StoreBatch, StoreFacade,
    StoreResult,
};
use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

/// Value kinds a key can hold.
#[derive(Debug, Clone)]
enum Stored {
    Bucket(Bytes),
    Scored(Vec<(f64, Bytes)>),
    Map(HashMap<String, Bytes>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Slot {
    fn persistent(value: Stored) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Shared keyspace. Batches hold a handle to it so they can apply on execute.
#[derive(Debug, Default)]
struct Keyspace {
    entries: RwLock<BTreeMap<String, Slot>>,
}

impl Keyspace {
    /// Read a live slot, cloning only the part the caller needs.
    fn read<T>(&self, key: &str, f: impl FnOnce(&Stored) -> StoreResult<T>) -> StoreResult<Option<T>> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(slot) if slot.is_live(Instant::now()) => f(&slot.value).map(Some),
            _ => Ok(None),
        }
    }

    /// Run `f` against the live slot for `key`, dropping it first if expired.
    fn write<T>(&self, key: &str, f: impl FnOnce(&mut Option<Slot>) -> StoreResult<T>) -> StoreResult<T> {
        let mut entries = self.entries.write();
        let mut slot = entries
            .remove(key)
            .filter(|slot| slot.is_live(Instant::now()));
        let result = f(&mut slot);
        if let Some(slot) = slot {
            entries.insert(key.to_string(), slot);
        }
        result
    }

    fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.read(key, |stored| match stored {
            Stored::Bucket(value) => Ok(value.clone()),
            _ => Err(wrong_type(key)),
        })
    }

    fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        self.write(key, |slot| {
            *slot = Some(Slot {
                value: Stored::Bucket(value),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            });
            Ok(())
        })
    }

    fn compare_and_set(&self, key: &str, expected: &Bytes, value: Bytes) -> StoreResult<bool> {
        self.write(key, |slot| {
            let matches = match slot.as_ref().map(|s| &s.value) {
                Some(Stored::Bucket(current)) => current == expected,
                Some(_) => return Err(wrong_type(key)),
                None => false,
            };
            if matches {
                let expires_at = slot.as_ref().and_then(|s| s.expires_at);
                *slot = Some(Slot {
                    value: Stored::Bucket(value),
                    expires_at,
                });
            }
            Ok(matches)
        })
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.write(key, |slot| Ok(slot.take().is_some()))
    }

    fn scored_add(&self, key: &str, score: f64, value: Bytes) -> StoreResult<bool> {
        if score.is_nan() {
            return Err(StoreError::InvalidScore {
                key: key.to_string(),
            });
        }
        self.write(key, |slot| {
            let slot = slot.get_or_insert_with(|| Slot::persistent(Stored::Scored(Vec::new())));
            let members = match &mut slot.value {
                Stored::Scored(members) => members,
                _ => return Err(wrong_type(key)),
            };

            let existing = members.iter().position(|(_, member)| *member == value);
            if let Some(index) = existing {
                members.remove(index);
            }
            // Equal scores keep insertion order.
            let at = members.partition_point(|(s, _)| *s <= score);
            members.insert(at, (score, value));
            Ok(existing.is_none())
        })
    }

    fn scored_range(
        &self,
        key: &str,
        start: i64,
        end: i64,
        reversed: bool,
    ) -> StoreResult<Vec<(f64, Bytes)>> {
        let window = self.read(key, |stored| match stored {
            Stored::Scored(members) => {
                let Some((from, to)) = clamp_range(start, end, members.len()) else {
                    return Ok(Vec::new());
                };
                let picked = if reversed {
                    members.iter().rev().skip(from).take(to - from + 1).cloned().collect()
                } else {
                    members[from..=to].to_vec()
                };
                Ok(picked)
            }
            _ => Err(wrong_type(key)),
        })?;
        Ok(window.unwrap_or_default())
    }

    fn map_put_all(&self, key: &str, fields: HashMap<String, Bytes>) -> StoreResult<()> {
        self.write(key, |slot| {
            let slot = slot.get_or_insert_with(|| Slot::persistent(Stored::Map(HashMap::new())));
            match &mut slot.value {
                Stored::Map(map) => {
                    map.extend(fields);
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    fn map_read(&self, key: &str, fields: Option<&HashSet<String>>) -> StoreResult<HashMap<String, Bytes>> {
        let found = self.read(key, |stored| match stored {
            Stored::Map(map) => Ok(match fields {
                Some(fields) => map
                    .iter()
                    .filter(|(field, _)| fields.contains(*field))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                None => map.clone(),
            }),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.unwrap_or_default())
    }

    fn map_remove_fields(&self, key: &str, fields: &HashSet<String>) -> StoreResult<u64> {
        self.write(key, |slot| {
            let Some(current) = slot.as_mut() else {
                return Ok(0);
            };
            let map = match &mut current.value {
                Stored::Map(map) => map,
                _ => return Err(wrong_type(key)),
            };
            let before = map.len();
            map.retain(|field, _| !fields.contains(field));
            let removed = (before - map.len()) as u64;
            if map.is_empty() {
                *slot = None;
            }
            Ok(removed)
        })
    }

    fn map_delete(&self, key: &str) -> StoreResult<bool> {
        self.write(key, |slot| match slot.as_ref().map(|s| &s.value) {
            Some(Stored::Map(_)) => Ok(slot.take().is_some()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(false),
        })
    }

    fn pattern_scan(&self, cursor: u64, limit: usize, pattern: &str) -> StoreResult<ScanPage> {
        let matcher = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            StoreError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;

        let entries = self.entries.read();
        let now = Instant::now();
        let start = cursor as usize;
        let mut items = Vec::new();

        for (key, slot) in entries.iter().skip(start).take(limit) {
            if !slot.is_live(now) || !matcher.is_match(key) {
                continue;
            }
            // Only single values are scanned; collections and maps are skipped.
            if let Stored::Bucket(value) = &slot.value {
                items.push(Bytes::copy_from_slice(key.as_bytes()));
                items.push(value.clone());
            }
        }

        let next = start.saturating_add(limit);
        let cursor = if next >= entries.len() { 0 } else { next as u64 };
        trace!(pattern, cursor, matched = items.len() / 2, "Scanned keyspace page");
        Ok(ScanPage { cursor, items })
    }

    fn apply(&self, command: BatchCommand) -> StoreResult<BatchReply> {
        match command {
            BatchCommand::Set { key, value, ttl } => {
                self.set(&key, value, ttl).map(|_| BatchReply::Done)
            }
            BatchCommand::CompareAndSet {
                key,
                expected,
                value,
            } => self
                .compare_and_set(&key, &expected, value)
                .map(BatchReply::Applied),
            BatchCommand::Delete { key } => self.delete(&key).map(BatchReply::Applied),
            BatchCommand::ScoredAdd { key, score, value } => {
                self.scored_add(&key, score, value).map(BatchReply::Applied)
            }
        }
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

/// Resolve native position indices against a collection of `len` members.
fn clamp_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let end = if end < 0 { end + len } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len || end < 0 {
        return None;
    }
    Some((start as usize, end as usize))
}

/// In-process [`StoreFacade`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    keyspace: Arc<Keyspace>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, including ones that expired but were not purged.
    pub fn key_count(&self) -> usize {
        self.keyspace.entries.read().len()
    }

    /// Open a concrete batch against this store.
    pub fn batch(&self) -> MemoryBatch {
        MemoryBatch {
            keyspace: self.keyspace.clone(),
            state: Mutex::new(BatchState::Open(Vec::new())),
        }
    }
}

#[async_trait]
impl StoreFacade for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.keyspace.get(key)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        self.keyspace.set(key, value, ttl)
    }

    async fn compare_and_set(&self, key: &str, expected: Bytes, value: Bytes) -> StoreResult<bool> {
        self.keyspace.compare_and_set(key, &expected, value)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.keyspace.delete(key)
    }

    async fn scored_add(&self, key: &str, score: f64, value: Bytes) -> StoreResult<bool> {
        self.keyspace.scored_add(key, score, value)
    }

    async fn scored_range(
        &self,
        key: &str,
        start: i64,
        end: i64,
        reversed: bool,
    ) -> StoreResult<Vec<(f64, Bytes)>> {
        self.keyspace.scored_range(key, start, end, reversed)
    }

    async fn map_put_all(&self, key: &str, entries: HashMap<String, Bytes>) -> StoreResult<()> {
        self.keyspace.map_put_all(key, entries)
    }

    async fn map_get_all(
        &self,
        key: &str,
        fields: &HashSet<String>,
    ) -> StoreResult<HashMap<String, Bytes>> {
        self.keyspace.map_read(key, Some(fields))
    }

    async fn map_read_all(&self, key: &str) -> StoreResult<HashMap<String, Bytes>> {
        self.keyspace.map_read(key, None)
    }

    async fn map_remove_fields(&self, key: &str, fields: &HashSet<String>) -> StoreResult<u64> {
        self.keyspace.map_remove_fields(key, fields)
    }

    async fn map_delete(&self, key: &str) -> StoreResult<bool> {
        self.keyspace.map_delete(key)
    }

    async fn pattern_scan(
        &self,
        cursor: u64,
        limit: usize,
        pattern: &str,
    ) -> StoreResult<ScanPage> {
        self.keyspace.pattern_scan(cursor, limit, pattern)
    }

    fn create_batch(&self) -> StoreResult<Arc<dyn StoreBatch>> {
        Ok(Arc::new(self.batch()))
    }
}

struct Queued {
    command: BatchCommand,
    reply: oneshot::Sender<StoreResult<BatchReply>>,
}

enum BatchState {
    Open(Vec<Queued>),
    Executed,
}

/// Single-shot batch over a [`MemoryStore`].
pub struct MemoryBatch {
    keyspace: Arc<Keyspace>,
    state: Mutex<BatchState>,
}

#[async_trait]
impl StoreBatch for MemoryBatch {
    fn register(&self, command: BatchCommand) -> StoreResult<ReplyReceiver> {
        let mut state = self.state.lock();
        match &mut *state {
            BatchState::Open(queue) => {
                let (tx, rx) = oneshot::channel();
                queue.push(Queued { command, reply: tx });
                Ok(rx)
            }
            BatchState::Executed => Err(StoreError::BatchAlreadyExecuted),
        }
    }

    fn len(&self) -> usize {
        match &*self.state.lock() {
            BatchState::Open(queue) => queue.len(),
            BatchState::Executed => 0,
        }
    }

    async fn execute(&self) -> StoreResult<BatchOutcome> {
        let queue = match std::mem::replace(&mut *self.state.lock(), BatchState::Executed) {
            BatchState::Open(queue) => queue,
            BatchState::Executed => return Err(StoreError::BatchAlreadyExecuted),
        };

        let mut outcome = BatchOutcome::default();
        for Queued { command, reply } in queue {
            let result = self.keyspace.apply(command);
            outcome.executed += 1;
            if result.is_err() {
                outcome.failed += 1;
            }
            // The caller may have dropped its future.
            let _ = reply.send(result);
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for MemoryBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBatch").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", b("v"), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b("v")));

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", b("v"), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryStore::new();
        store.set("k", b("cur"), None).await.unwrap();

        assert!(!store.compare_and_set("k", b("old"), b("new")).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b("cur")));

        assert!(store.compare_and_set("k", b("cur"), b("new")).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b("new")));

        assert!(!store.compare_and_set("absent", b("x"), b("y")).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.scored_add("z", 1.0, b("a")).await.unwrap();
        assert!(matches!(
            store.get("z").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_scored_range_forward_and_reverse() {
        let store = MemoryStore::new();
        assert!(store.scored_add("z", 2.0, b("B")).await.unwrap());
        assert!(store.scored_add("z", 1.0, b("A")).await.unwrap());

        let fwd = store.scored_range("z", 0, 1, false).await.unwrap();
        assert_eq!(fwd, vec![(1.0, b("A")), (2.0, b("B"))]);

        let rev = store.scored_range("z", 0, 1, true).await.unwrap();
        assert_eq!(rev, vec![(2.0, b("B")), (1.0, b("A"))]);
    }

    #[tokio::test]
    async fn test_scored_ties_keep_insertion_order() {
        let store = MemoryStore::new();
        store.scored_add("z", 1.0, b("first")).await.unwrap();
        store.scored_add("z", 1.0, b("second")).await.unwrap();
        store.scored_add("z", 0.5, b("zero")).await.unwrap();

        let all = store.scored_range("z", 0, -1, false).await.unwrap();
        let values: Vec<_> = all.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![b("zero"), b("first"), b("second")]);
    }

    #[tokio::test]
    async fn test_scored_readd_updates_score() {
        let store = MemoryStore::new();
        store.scored_add("z", 1.0, b("a")).await.unwrap();
        store.scored_add("z", 2.0, b("b")).await.unwrap();
        assert!(!store.scored_add("z", 3.0, b("a")).await.unwrap());

        let all = store.scored_range("z", 0, -1, false).await.unwrap();
        assert_eq!(all, vec![(2.0, b("b")), (3.0, b("a"))]);
    }

    #[tokio::test]
    async fn test_scored_add_rejects_nan() {
        let store = MemoryStore::new();
        store.scored_add("z", 1.0, b("a")).await.unwrap();
        store.scored_add("z", 2.0, b("b")).await.unwrap();

        assert_eq!(
            store.scored_add("z", f64::NAN, b("c")).await,
            Err(StoreError::InvalidScore { key: "z".into() })
        );
        // Re-adding an existing member with NaN leaves it in place.
        assert!(store.scored_add("z", f64::NAN, b("a")).await.is_err());
        assert!(store.scored_add("fresh", f64::NAN, b("a")).await.is_err());
        assert_eq!(store.key_count(), 1);

        let batch = store.batch();
        let rx = batch
            .register(BatchCommand::ScoredAdd {
                key: "z".into(),
                score: f64::NAN,
                value: b("c"),
            })
            .unwrap();
        assert_eq!(batch.execute().await.unwrap().failed, 1);
        assert!(matches!(
            rx.await.unwrap(),
            Err(StoreError::InvalidScore { .. })
        ));

        let all = store.scored_range("z", 0, -1, false).await.unwrap();
        assert_eq!(all, vec![(1.0, b("a")), (2.0, b("b"))]);
    }

    #[tokio::test]
    async fn test_scored_range_edges() {
        let store = MemoryStore::new();
        assert!(store.scored_range("missing", 0, 10, false).await.unwrap().is_empty());

        for (i, v) in ["a", "b", "c"].iter().enumerate() {
            store.scored_add("z", i as f64, b(v)).await.unwrap();
        }
        assert!(store.scored_range("z", 5, 10, false).await.unwrap().is_empty());
        assert!(store.scored_range("z", 2, 1, false).await.unwrap().is_empty());
        assert_eq!(store.scored_range("z", 0, 99, false).await.unwrap().len(), 3);

        let last_two = store.scored_range("z", -2, -1, false).await.unwrap();
        assert_eq!(last_two, vec![(1.0, b("b")), (2.0, b("c"))]);
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(0, -1, 3), Some((0, 2)));
        assert_eq!(clamp_range(-10, 1, 3), Some((0, 1)));
        assert_eq!(clamp_range(0, 0, 0), None);
        assert_eq!(clamp_range(1, -5, 3), None);
    }

    #[tokio::test]
    async fn test_map_operations() {
        let store = MemoryStore::new();
        let mut fields = HashMap::new();
        fields.insert("a".to_string(), b("1"));
        fields.insert("b".to_string(), b("2"));
        store.map_put_all("m", fields).await.unwrap();

        let all = store.map_read_all("m").await.unwrap();
        assert_eq!(all.len(), 2);

        let wanted: HashSet<String> = ["a".to_string(), "zz".to_string()].into();
        let some = store.map_get_all("m", &wanted).await.unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some["a"], b("1"));

        assert_eq!(store.map_remove_fields("m", &wanted).await.unwrap(), 1);
        assert_eq!(store.map_read_all("m").await.unwrap().len(), 1);

        assert!(store.map_delete("m").await.unwrap());
        assert!(store.map_read_all("m").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pattern_scan_pages() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store
                .set(&format!("ns:item:{:02}", i), b("v"), None)
                .await
                .unwrap();
        }
        store.set("other", b("v"), None).await.unwrap();

        let mut cursor = 0;
        let mut seen = 0;
        let mut pages = 0;
        loop {
            let page = store.pattern_scan(cursor, 10, "ns:item:.*").await.unwrap();
            seen += page.items.len() / 2;
            pages += 1;
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen, 25);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn test_pattern_scan_invalid_regex() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.pattern_scan(0, 10, "(").await,
            Err(StoreError::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_executes_once() {
        let store = MemoryStore::new();
        let batch = store.batch();

        let set_rx = batch
            .register(BatchCommand::Set {
                key: "k".into(),
                value: b("v"),
                ttl: None,
            })
            .unwrap();
        let cas_rx = batch
            .register(BatchCommand::CompareAndSet {
                key: "k".into(),
                expected: b("nope"),
                value: b("w"),
            })
            .unwrap();
        assert_eq!(batch.len(), 2);

        // Nothing is applied before execution.
        assert!(store.get("k").await.unwrap().is_none());

        let outcome = batch.execute().await.unwrap();
        assert_eq!(outcome.executed, 2);
        assert_eq!(outcome.failed, 0);

        assert_eq!(set_rx.await.unwrap(), Ok(BatchReply::Done));
        assert_eq!(cas_rx.await.unwrap(), Ok(BatchReply::Applied(false)));
        assert_eq!(store.get("k").await.unwrap(), Some(b("v")));

        assert!(matches!(
            batch.register(BatchCommand::Delete { key: "k".into() }),
            Err(StoreError::BatchAlreadyExecuted)
        ));
        assert!(matches!(
            batch.execute().await,
            Err(StoreError::BatchAlreadyExecuted)
        ));
    }

    #[tokio::test]
    async fn test_batch_failure_is_isolated() {
        let store = MemoryStore::new();
        store.scored_add("z", 1.0, b("a")).await.unwrap();

        let batch = store.batch();
        let bad = batch
            .register(BatchCommand::Set {
                key: "ok".into(),
                value: b("1"),
                ttl: None,
            })
            .unwrap();
        let wrong = batch
            .register(BatchCommand::CompareAndSet {
                key: "z".into(),
                expected: b("a"),
                value: b("b"),
            })
            .unwrap();

        let outcome = batch.execute().await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(bad.await.unwrap(), Ok(BatchReply::Done));
        assert!(matches!(
            wrong.await.unwrap(),
            Err(StoreError::WrongType { .. })
        ));
    }
}
