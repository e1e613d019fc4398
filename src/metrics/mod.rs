//! Metrics for the batch pipeline and scans.
//!
//! Everything is a plain atomic so recording never blocks an enqueue.
//!
//! ```text
//! ┌──────────────────────────── CacheMetrics ────────────────────────────┐
//! │  Counters                          │  Histograms                     │
//! │  - operations enqueued (by kind)   │  - batch size                   │
//! │  - batches executed / failed       │  - batch latency                │
//! │  - race retries / exhaustion       │  - scan latency                 │
//! │  - rejected mutations              │                                 │
//! │  - scans / decode failures         │                                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod histograms;

pub use counters::{Counter, LabeledCounter};
pub use histograms::{
    Histogram, HistogramSnapshot, HistogramTimer, BATCH_SIZE_BUCKETS, LATENCY_BUCKETS,
};

use std::time::Duration;

/// Metrics shared by the pipeline, scan decoder and facade.
#[derive(Debug)]
pub struct CacheMetrics {
    /// Operations accepted into a batch, by command.
    pub operations_enqueued: LabeledCounter,
    /// Registration attempts that hit the batch race and were retried.
    pub race_retries: Counter,
    /// Enqueues that gave up after the retry bound.
    pub retries_exhausted: Counter,

    /// Batches that ran to completion.
    pub batches_executed: Counter,
    /// Batches whose execution returned an error.
    pub batch_failures: Counter,
    /// Individual commands that failed inside an executed batch.
    pub command_failures: Counter,
    /// Conditional mutations the store declined to apply.
    pub mutations_rejected: Counter,

    pub batch_size: Histogram,
    pub batch_latency: Histogram,

    pub scans_total: Counter,
    pub scan_decode_failures: Counter,
    pub scan_latency: Histogram,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self {
            operations_enqueued: LabeledCounter::new(
                "cache_operations_enqueued_total",
                "Operations accepted into a batch",
                "command",
            ),
            race_retries: Counter::new(
                "cache_batch_race_retries_total",
                "Registrations retried after a concurrent batch swap",
            ),
            retries_exhausted: Counter::new(
                "cache_batch_retries_exhausted_total",
                "Enqueues abandoned after the retry bound",
            ),
            batches_executed: Counter::new("cache_batches_executed_total", "Executed batches"),
            batch_failures: Counter::new("cache_batch_failures_total", "Batches that failed to execute"),
            command_failures: Counter::new(
                "cache_batch_command_failures_total",
                "Commands that failed inside a batch",
            ),
            mutations_rejected: Counter::new(
                "cache_mutations_rejected_total",
                "Conditional mutations not applied by the store",
            ),
            batch_size: Histogram::new(
                "cache_batch_size",
                "Operations per executed batch",
                BATCH_SIZE_BUCKETS,
            ),
            batch_latency: Histogram::new(
                "cache_batch_latency_seconds",
                "Batch execution latency",
                LATENCY_BUCKETS,
            ),
            scans_total: Counter::new("cache_scans_total", "Pattern scans run"),
            scan_decode_failures: Counter::new(
                "cache_scan_decode_failures_total",
                "Scans aborted by a value that failed to decode",
            ),
            scan_latency: Histogram::new(
                "cache_scan_latency_seconds",
                "Full pattern scan latency",
                LATENCY_BUCKETS,
            ),
        }
    }

    pub fn record_enqueue(&self, command: &'static str) {
        self.operations_enqueued.inc(command);
    }

    /// Record one executed batch. `failed_commands` is `None` when the batch itself failed.
    pub fn record_batch(&self, size: usize, failed_commands: Option<usize>, latency: Duration) {
        self.batch_size.observe(size as f64);
        self.batch_latency.observe_duration(latency);
        match failed_commands {
            Some(failed) => {
                self.batches_executed.inc();
                self.command_failures.inc_by(failed as u64);
            }
            None => self.batch_failures.inc(),
        }
    }

    pub fn record_scan(&self, decoded: bool, latency: Duration) {
        self.scans_total.inc();
        if !decoded {
            self.scan_decode_failures.inc();
        }
        self.scan_latency.observe_duration(latency);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_enqueued: self.operations_enqueued.get_all().into_iter().map(|(_, n)| n).sum(),
            race_retries: self.race_retries.get(),
            retries_exhausted: self.retries_exhausted.get(),
            batches_executed: self.batches_executed.get(),
            batch_failures: self.batch_failures.get(),
            command_failures: self.command_failures.get(),
            mutations_rejected: self.mutations_rejected.get(),
            scans_total: self.scans_total.get(),
            scan_decode_failures: self.scan_decode_failures.get(),
            batch_size: self.batch_size.snapshot(),
            batch_latency: self.batch_latency.snapshot(),
        }
    }

    /// Render counters and histogram totals in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        let counters = [
            &self.race_retries,
            &self.retries_exhausted,
            &self.batches_executed,
            &self.batch_failures,
            &self.command_failures,
            &self.mutations_rejected,
            &self.scans_total,
            &self.scan_decode_failures,
        ];
        for c in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n",
                name = c.name(),
                help = c.help(),
                value = c.get()
            ));
        }

        let labeled = &self.operations_enqueued;
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n",
            name = labeled.name(),
            help = labeled.help()
        ));
        for (value, n) in labeled.get_all() {
            out.push_str(&format!("{}{{{}=\"{}\"}} {}\n", labeled.name(), labeled.label(), value, n));
        }

        for h in [&self.batch_size, &self.batch_latency, &self.scan_latency] {
            let snap = h.snapshot();
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} histogram\n{name}_sum {sum}\n{name}_count {count}\n",
                name = h.name(),
                help = h.help(),
                sum = snap.sum,
                count = snap.count
            ));
        }
        out
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub operations_enqueued: u64,
    pub race_retries: u64,
    pub retries_exhausted: u64,
    pub batches_executed: u64,
    pub batch_failures: u64,
    pub command_failures: u64,
    pub mutations_rejected: u64,
    pub scans_total: u64,
    pub scan_decode_failures: u64,
    pub batch_size: HistogramSnapshot,
    pub batch_latency: HistogramSnapshot,
}

impl MetricsSnapshot {
    /// Mean operations per executed batch.
    pub fn avg_batch_size(&self) -> f64 {
        self.batch_size.mean()
    }

    pub fn avg_batch_latency_ms(&self) -> f64 {
        self.batch_latency.mean() * 1000.0
    }
}
