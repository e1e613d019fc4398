//! Store capability surface consumed by the cache client.
//!
//! The client never talks to a backend directly. It depends on
//! [`StoreFacade`] for immediate calls and on [`StoreBatch`] for pipelined
//! mutations. [`MemoryStore`] is the in-process implementation.
//!
//! # Batches
//!
//! ```text
//!   register(cmd) ──► reply receiver ──┐
//!   register(cmd) ──► reply receiver ──┤   execute()
//!          ...                         ├──────────────► replies sent, batch sealed
//!   register(cmd) ──► reply receiver ──┘
//!   register(cmd) after execute() ──► Err(BatchAlreadyExecuted)
//! ```

pub mod memory;

pub use memory::{MemoryBatch, MemoryStore};

use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Receiver resolved when the batch holding a command executes.
pub type ReplyReceiver = oneshot::Receiver<StoreResult<BatchReply>>;

/// A mutation registered against a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchCommand {
    /// Unconditional write.
    Set {
        key: String,
        value: Bytes,
        ttl: Option<Duration>,
    },

    /// Write only if the current value equals `expected`.
    CompareAndSet {
        key: String,
        expected: Bytes,
        value: Bytes,
    },

    /// Remove a single value.
    Delete { key: String },

    /// Insert into a scored collection.
    ScoredAdd { key: String, score: f64, value: Bytes },
}

impl BatchCommand {
    /// Physical key the command targets.
    pub fn key(&self) -> &str {
        match self {
            BatchCommand::Set { key, .. }
            | BatchCommand::CompareAndSet { key, .. }
            | BatchCommand::Delete { key }
            | BatchCommand::ScoredAdd { key, .. } => key,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BatchCommand::Set { .. } => "set",
            BatchCommand::CompareAndSet { .. } => "compare_and_set",
            BatchCommand::Delete { .. } => "delete",
            BatchCommand::ScoredAdd { .. } => "scored_add",
        }
    }

    /// Whether a `false` reply means the mutation did not apply.
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            BatchCommand::CompareAndSet { .. } | BatchCommand::ScoredAdd { .. }
        )
    }
}

/// Per-command result of an executed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchReply {
    /// The command completed with no boolean outcome.
    Done,
    /// The command reported whether it changed anything.
    Applied(bool),
}

/// Summary of one batch execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Commands run against the store.
    pub executed: usize,
    /// Commands that returned a store error.
    pub failed: usize,
}

/// One page of a pattern scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    /// Cursor for the next call; `0` when the scan is complete.
    pub cursor: u64,
    /// Interleaved `key, value, key, value, ...` items.
    pub items: Vec<Bytes>,
}

/// An accumulator of pending mutations executed as one unit.
#[async_trait]
pub trait StoreBatch: Send + Sync {
    /// Queue a command. Fails with [`StoreError::BatchAlreadyExecuted`] once
    /// execution has begun.
    fn register(&self, command: BatchCommand) -> StoreResult<ReplyReceiver>;

    /// Number of queued commands.
    fn len(&self) -> usize;

    /// Whether no command is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every queued command and resolve their receivers. A batch executes at most once.
    async fn execute(&self) -> StoreResult<BatchOutcome>;
}

/// Bucket, scored-collection and map primitives of the backing store.
#[async_trait]
pub trait StoreFacade: Send + Sync {
    /// Read a single value.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Write a single value.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write `value` only if the stored value equals `expected`.
    async fn compare_and_set(&self, key: &str, expected: Bytes, value: Bytes) -> StoreResult<bool>;

    /// Remove a value of any kind. Returns whether a value existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Insert into a scored collection. Returns `false` when the member already existed.
    async fn scored_add(&self, key: &str, score: f64, value: Bytes) -> StoreResult<bool>;

    /// Read a position window of a scored collection.
    async fn scored_range(
        &self,
        key: &str,
        start: i64,
        end: i64,
        reversed: bool,
    ) -> StoreResult<Vec<(f64, Bytes)>>;

    /// Insert or replace fields of a map.
    async fn map_put_all(&self, key: &str, entries: HashMap<String, Bytes>) -> StoreResult<()>;

    /// Read the listed fields of a map; missing fields are omitted.
    async fn map_get_all(
        &self,
        key: &str,
        fields: &HashSet<String>,
    ) -> StoreResult<HashMap<String, Bytes>>;

    /// Read every field of a map.
    async fn map_read_all(&self, key: &str) -> StoreResult<HashMap<String, Bytes>>;

    /// Remove fields of a map. Returns the number removed.
    async fn map_remove_fields(&self, key: &str, fields: &HashSet<String>) -> StoreResult<u64>;

    /// Remove a whole map.
    async fn map_delete(&self, key: &str) -> StoreResult<bool>;

    /// Return the next page of single values whose keys match `pattern`.
    async fn pattern_scan(&self, cursor: u64, limit: usize, pattern: &str)
        -> StoreResult<ScanPage>;

    /// Open a new batch.
    fn create_batch(&self) -> StoreResult<Arc<dyn StoreBatch>>;
}
