//! Full pattern scans with per-value decoding.

use crate::error::{CodecError, Error, Result};
use crate::metrics::CacheMetrics;
use crate::store::StoreFacade;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Smallest request width passed to the store per scan call.
pub const MIN_SCAN_LIMIT: usize = 10;

/// Drives the store's cursor scan to completion and decodes every value.
#[derive(Clone)]
pub struct ScanDecoder {
    store: Arc<dyn StoreFacade>,
    limit: usize,
    metrics: Arc<CacheMetrics>,
}

impl ScanDecoder {
    /// Create a decoder. A `limit` below [`MIN_SCAN_LIMIT`] is raised to it.
    pub fn new(store: Arc<dyn StoreFacade>, limit: usize, metrics: Arc<CacheMetrics>) -> Self {
        let limit = if limit < MIN_SCAN_LIMIT {
            warn!(
                configured = limit,
                min = MIN_SCAN_LIMIT,
                "Scan limit should be at least {}, raising it",
                MIN_SCAN_LIMIT
            );
            MIN_SCAN_LIMIT
        } else {
            limit
        };
        Self {
            store,
            limit,
            metrics,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Collect every key matching `pattern` with its decoded value.
    ///
    /// The first value seen for a key wins. A value that fails to decode
    /// aborts the scan and nothing is returned.
    pub async fn scan_all<T, F>(&self, pattern: &str, decode: F) -> Result<HashMap<String, T>>
    where
        F: Fn(&[u8]) -> std::result::Result<T, CodecError>,
    {
        let started = Instant::now();
        let result = self.collect(pattern, decode).await;
        let decoded = !matches!(result, Err(Error::Decode { .. }));
        self.metrics.record_scan(decoded, started.elapsed());
        result
    }

    async fn collect<T, F>(&self, pattern: &str, decode: F) -> Result<HashMap<String, T>>
    where
        F: Fn(&[u8]) -> std::result::Result<T, CodecError>,
    {
        debug!(limit = self.limit, pattern, "Scanning store");
        let mut found = HashMap::new();
        let mut cursor = 0;
        let mut pages = 0usize;

        loop {
            let page = self.store.pattern_scan(cursor, self.limit, pattern).await?;
            pages += 1;

            let mut items = page.items.chunks_exact(2);
            for pair in &mut items {
                let key = std::str::from_utf8(&pair[0]).map_err(|e| Error::Decode {
                    key: String::from_utf8_lossy(&pair[0]).into_owned(),
                    reason: format!("key is not valid utf-8: {}", e),
                })?;
                if found.contains_key(key) {
                    continue;
                }
                let value = decode(&pair[1]).map_err(|e| {
                    error!(key, error = %e, "Failed to decode scanned value");
                    Error::Decode {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                found.insert(key.to_string(), value);
            }
            if let [dangling] = items.remainder() {
                return Err(Error::Decode {
                    key: String::from_utf8_lossy(dangling).into_owned(),
                    reason: "scan page ended with a key and no value".to_string(),
                });
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern, pages, matched = found.len(), "Scan complete");
        Ok(found)
    }
}

impl std::fmt::Debug for ScanDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDecoder")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
