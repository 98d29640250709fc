//! Metrics for staging and loading batches.
//!
//! Everything goes through the `metrics` facade; the binary decides whether a
//! recorder is installed.

use metrics::{counter, histogram};
use std::time::Duration;

/// Per-table metric handles
#[derive(Debug, Clone)]
pub struct LoaderMetrics {
    database: String,
    table: String,
}

impl LoaderMetrics {
    pub fn new(database: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
        }
    }

    pub fn record_written(&self, bytes: usize) {
        counter!(
            "broker_load_records_written_total",
            "database" => self.database.clone(),
            "table" => self.table.clone()
        )
        .increment(1);
        counter!(
            "broker_load_bytes_written_total",
            "database" => self.database.clone(),
            "table" => self.table.clone()
        )
        .increment(bytes as u64);
    }

    pub fn record_staged(&self, bytes: u64) {
        histogram!(
            "broker_load_batch_bytes",
            "database" => self.database.clone(),
            "table" => self.table.clone()
        )
        .record(bytes as f64);
    }

    pub fn record_timeout(&self) {
        counter!(
            "broker_load_timeouts_total",
            "database" => self.database.clone(),
            "table" => self.table.clone()
        )
        .increment(1);
    }

    pub fn record_loaded(&self, duration: Duration) {
        counter!(
            "broker_load_batches_loaded_total",
            "database" => self.database.clone(),
            "table" => self.table.clone()
        )
        .increment(1);
        histogram!(
            "broker_load_duration_seconds",
            "database" => self.database.clone(),
            "table" => self.table.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Batch gave up after repeated timeouts; the staging file awaits recovery
    pub fn record_retained(&self) {
        counter!(
            "broker_load_batches_retained_total",
            "database" => self.database.clone(),
            "table" => self.table.clone()
        )
        .increment(1);
    }

    pub fn record_failed(&self, kind: &'static str) {
        counter!(
            "broker_load_batches_failed_total",
            "database" => self.database.clone(),
            "table" => self.table.clone(),
            "kind" => kind
        )
        .increment(1);
    }

    pub fn record_staging_deleted(&self) {
        counter!(
            "broker_load_staging_files_deleted_total",
            "database" => self.database.clone(),
            "table" => self.table.clone()
        )
        .increment(1);
    }
}
