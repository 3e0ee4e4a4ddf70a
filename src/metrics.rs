use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names emitted by the pipeline.
///
/// Only the `metrics` facade is used; installing a recorder or exporter is
/// left to the embedding process.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    // Stage metrics
    pub stage_rows_total: &'static str,
    pub stage_duration: &'static str,

    // Check metrics
    pub fatal_checks_total: &'static str,
    pub duplicate_images_total: &'static str,

    // Store metrics
    pub published_rows: &'static str,
    pub raw_rows_ingested_total: &'static str,
    pub db_operation_duration: &'static str,

    // Export metrics
    pub export_files_created_total: &'static str,

    // Error metrics
    pub errors_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            stage_rows_total: "channel_analytics_stage_rows_total",
            stage_duration: "channel_analytics_stage_duration_seconds",

            fatal_checks_total: "channel_analytics_fatal_checks_total",
            duplicate_images_total: "channel_analytics_duplicate_images_total",

            published_rows: "channel_analytics_published_rows",
            raw_rows_ingested_total: "channel_analytics_raw_rows_ingested_total",
            db_operation_duration: "channel_analytics_db_operation_duration_seconds",

            export_files_created_total: "channel_analytics_export_files_created_total",

            errors_total: "channel_analytics_errors_total",
        }
    }
}

impl MetricsCollector {
    /// Record the row flow and duration of one stage
    pub fn record_stage(
        &self,
        stage: &'static str,
        input: usize,
        output: usize,
        filtered: usize,
        rejected: usize,
        duration: Duration,
    ) {
        for (outcome, rows) in [
            ("input", input),
            ("output", output),
            ("filtered", filtered),
            ("rejected", rejected),
        ] {
            counter!(self.stage_rows_total, "stage" => stage, "outcome" => outcome).increment(rows as u64);
        }
        histogram!(self.stage_duration, "stage" => stage).record(duration.as_secs_f64());
    }

    /// Record a failed run check; these are the alerting signal
    pub fn record_fatal_check(&self, check: &'static str) {
        counter!(self.fatal_checks_total, "check" => check).increment(1);
    }

    /// Record image duplicates dropped by the aggregation
    pub fn record_duplicate_images(&self, count: usize) {
        counter!(self.duplicate_images_total).increment(count as u64);
    }

    /// Set the published row count of a mart
    pub fn record_published(&self, mart: &'static str, rows: usize) {
        gauge!(self.published_rows, "mart" => mart).set(rows as f64);
    }

    /// Record raw rows written by ingestion
    pub fn record_ingest(&self, table: &'static str, inserted: usize) {
        counter!(self.raw_rows_ingested_total, "table" => table).increment(inserted as u64);
    }

    /// Record a database operation
    pub fn record_db_operation(&self, operation: &'static str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        histogram!(self.db_operation_duration, "operation" => operation, "status" => status)
            .record(duration.as_secs_f64());
        if !success {
            self.record_error("database", operation);
        }
    }

    /// Record files written by an export
    pub fn record_export(&self, format: &'static str, file_count: usize) {
        counter!(self.export_files_created_total, "format" => format).increment(file_count as u64);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &'static str, operation: &'static str) {
        counter!(self.errors_total, "type" => error_type, "operation" => operation).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_names() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.stage_rows_total, "channel_analytics_stage_rows_total");
        assert!(collector.fatal_checks_total.starts_with("channel_analytics_"));
    }

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        let collector = MetricsCollector::default();
        collector.record_stage("stg_telegram_messages", 10, 8, 1, 1, Duration::from_millis(5));
        collector.record_fatal_check("join_integrity");
        collector.record_published("fct_messages", 8);
    }
}
