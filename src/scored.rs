//! Score-ordered collections on top of the store's sorted-set primitives.

use crate::error::Result;
use crate::store::{BatchCommand, StoreFacade};
use crate::types::{RangeSpec, ScoredEntry};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Translates score and range requests into sorted-set calls.
///
/// Keys passed here are already namespaced.
#[derive(Clone)]
pub struct ScoredCollectionAdapter {
    store: Arc<dyn StoreFacade>,
}

impl ScoredCollectionAdapter {
    pub fn new(store: Arc<dyn StoreFacade>) -> Self {
        Self { store }
    }

    /// Insert `value` with `score`. Returns `false` if the member was
    /// already present; its score is updated either way.
    pub async fn add(&self, key: &str, score: f64, value: Bytes) -> Result<bool> {
        let added = self.store.scored_add(key, score, value).await?;
        debug!(key, score, added, "Added scored member");
        Ok(added)
    }

    /// The batch form of [`add`](Self::add).
    pub fn add_command(key: impl Into<String>, score: f64, value: Bytes) -> BatchCommand {
        BatchCommand::ScoredAdd {
            key: key.into(),
            score,
            value,
        }
    }

    /// Members at positions `[start, end]` of the window, in window order.
    ///
    /// An absent collection or a window outside it yields an empty list.
    pub async fn range(&self, key: &str, range: RangeSpec) -> Result<Vec<ScoredEntry<Bytes>>> {
        let members = self
            .store
            .scored_range(key, range.start, range.end, range.reversed)
            .await?;
        debug!(
            key,
            start = range.start,
            end = range.end,
            reversed = range.reversed,
            found = members.len(),
            "Read scored range"
        );
        Ok(members
            .into_iter()
            .map(|(score, value)| ScoredEntry::new(score, value))
            .collect())
    }
}

impl std::fmt::Debug for ScoredCollectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoredCollectionAdapter").finish_non_exhaustive()
    }
}
