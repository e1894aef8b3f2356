//! Prometheus metrics for units of work

use crate::dispatcher::FlushOutcome;
use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry, Histogram,
    HistogramOpts, IntCounter, Opts, Registry,
};

#[derive(Clone)]
pub struct IndexingMetrics {
    pub work_items_submitted: IntCounter,
    pub work_items_failed: IntCounter,
    pub units_committed: IntCounter,
    pub units_failed: IntCounter,
    pub units_rolled_back: IntCounter,
    pub flush_duration: Histogram,
}

impl IndexingMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            work_items_submitted: register_int_counter_with_registry!(
                Opts::new(
                    "indexing_work_items_submitted_total",
                    "Work items handed to the backend"
                ),
                registry
            )?,
            work_items_failed: register_int_counter_with_registry!(
                Opts::new(
                    "indexing_work_items_failed_total",
                    "Work items not indexed (rejected, timed out or not translated)"
                ),
                registry
            )?,
            units_committed: register_int_counter_with_registry!(
                Opts::new("indexing_units_committed_total", "Committed units of work"),
                registry
            )?,
            units_failed: register_int_counter_with_registry!(
                Opts::new("indexing_units_failed_total", "Failed units of work"),
                registry
            )?,
            units_rolled_back: register_int_counter_with_registry!(
                Opts::new(
                    "indexing_units_rolled_back_total",
                    "Units of work whose transaction rolled back"
                ),
                registry
            )?,
            flush_duration: register_histogram_with_registry!(
                HistogramOpts::new("indexing_flush_duration_seconds", "Flush duration")
                    .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
                registry
            )?,
        })
    }

    pub fn observe_submitted(&self, items: usize) {
        self.work_items_submitted.inc_by(items as u64);
    }

    pub fn observe_flush(&self, outcome: &FlushOutcome) {
        let failed: usize = outcome.failures.iter().map(|f| f.keys.len()).sum();
        self.work_items_failed.inc_by(failed as u64);
        if outcome.is_success() {
            self.units_committed.inc();
        } else {
            self.units_failed.inc();
        }
        self.flush_duration
            .observe(outcome.duration_ms as f64 / 1000.0);
    }

    pub fn observe_rollback(&self) {
        self.units_rolled_back.inc();
    }
}

impl std::fmt::Debug for IndexingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingMetrics")
            .field("work_items_submitted", &self.work_items_submitted.get())
            .field("work_items_failed", &self.work_items_failed.get())
            .finish_non_exhaustive()
    }
}
