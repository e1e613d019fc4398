//! Monotonic counters.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A named counter that only goes up (until reset).
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Counter split by one label, e.g. the batch command kind.
#[derive(Debug)]
pub struct LabeledCounter {
    name: &'static str,
    help: &'static str,
    label: &'static str,
    values: RwLock<HashMap<&'static str, AtomicU64>>,
}

impl LabeledCounter {
    pub fn new(name: &'static str, help: &'static str, label: &'static str) -> Self {
        Self {
            name,
            help,
            label,
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    /// Name of the label dimension.
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn inc(&self, value: &'static str) {
        // Fast path: the label value has been seen before.
        if let Some(counter) = self.values.read().get(value) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.values
            .write()
            .entry(value)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, value: &str) -> u64 {
        self.values
            .read()
            .get(value)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// All label values with their counts, sorted by label value.
    pub fn get_all(&self) -> Vec<(&'static str, u64)> {
        let mut all: Vec<_> = self
            .values
            .read()
            .iter()
            .map(|(k, v)| (*k, v.load(Ordering::Relaxed)))
            .collect();
        all.sort_unstable_by_key(|(k, _)| *k);
        all
    }

    pub fn reset(&self) {
        self.values.write().clear();
    }
}
