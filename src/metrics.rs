//! Metric names and recording helpers for the pipeline phases.
//!
//! Recording goes through the `metrics` facade; without an installed recorder
//! every call is a no-op, which is what library users and tests get.

use std::fmt;
use std::fs;
use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

/// Every metric emitted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Source loading
    LoadAttempts,
    LoadFailures,
    LoadDuration,
    LoadRows,
    SourcesSkipped,

    // Normalization
    NormalizeRowsAccepted,
    NormalizeRowsNullYear,
    NormalizeRowsRejected,

    // Tags and aggregation
    TagsRepaired,
    AggregateRecords,
    AggregateExcludedKeys,
    FactTableWrites,

    // Hedonic model
    HedonicObservations,
    HedonicAdjRSquared,
    HedonicVerdicts,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::LoadAttempts => "barrio_load_attempts_total",
            MetricName::LoadFailures => "barrio_load_failures_total",
            MetricName::LoadDuration => "barrio_load_duration_seconds",
            MetricName::LoadRows => "barrio_load_rows",
            MetricName::SourcesSkipped => "barrio_sources_skipped_total",

            MetricName::NormalizeRowsAccepted => "barrio_normalize_rows_accepted_total",
            MetricName::NormalizeRowsNullYear => "barrio_normalize_rows_null_year_total",
            MetricName::NormalizeRowsRejected => "barrio_normalize_rows_rejected_total",

            MetricName::TagsRepaired => "barrio_tags_repaired_total",
            MetricName::AggregateRecords => "barrio_aggregate_records_total",
            MetricName::AggregateExcludedKeys => "barrio_aggregate_excluded_keys_total",
            MetricName::FactTableWrites => "barrio_fact_table_writes_total",

            MetricName::HedonicObservations => "barrio_hedonic_observations",
            MetricName::HedonicAdjRSquared => "barrio_hedonic_adj_r_squared",
            MetricName::HedonicVerdicts => "barrio_hedonic_verdicts_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod load {
    use super::MetricName;

    pub fn attempt_succeeded(source: &str, rows: usize, elapsed_secs: f64) {
        ::metrics::counter!(MetricName::LoadAttempts.as_str(), "source" => source.to_string(), "outcome" => "success")
            .increment(1);
        ::metrics::histogram!(MetricName::LoadDuration.as_str(), "source" => source.to_string()).record(elapsed_secs);
        ::metrics::histogram!(MetricName::LoadRows.as_str(), "source" => source.to_string()).record(rows as f64);
    }

    pub fn attempt_failed(source: &str, elapsed_secs: f64) {
        ::metrics::counter!(MetricName::LoadAttempts.as_str(), "source" => source.to_string(), "outcome" => "failure")
            .increment(1);
        ::metrics::counter!(MetricName::LoadFailures.as_str(), "source" => source.to_string()).increment(1);
        ::metrics::histogram!(MetricName::LoadDuration.as_str(), "source" => source.to_string()).record(elapsed_secs);
    }

    pub fn source_skipped(source: &str) {
        ::metrics::counter!(MetricName::SourcesSkipped.as_str(), "source" => source.to_string()).increment(1);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn batch_normalized(source: &str, accepted: usize, null_year: usize, rejected: usize) {
        ::metrics::counter!(MetricName::NormalizeRowsAccepted.as_str(), "source" => source.to_string())
            .increment(accepted as u64);
        ::metrics::counter!(MetricName::NormalizeRowsNullYear.as_str(), "source" => source.to_string())
            .increment(null_year as u64);
        ::metrics::counter!(MetricName::NormalizeRowsRejected.as_str(), "source" => source.to_string())
            .increment(rejected as u64);
    }
}

pub mod aggregate {
    use super::MetricName;

    pub fn tags_repaired(column: &'static str, count: usize) {
        ::metrics::counter!(MetricName::TagsRepaired.as_str(), "column" => column).increment(count as u64);
    }

    pub fn table_aggregated(table: &'static str, records: usize, excluded: usize) {
        ::metrics::counter!(MetricName::AggregateRecords.as_str(), "table" => table).increment(records as u64);
        ::metrics::counter!(MetricName::AggregateExcludedKeys.as_str(), "table" => table).increment(excluded as u64);
    }

    pub fn table_written(table: &'static str) {
        ::metrics::counter!(MetricName::FactTableWrites.as_str(), "table" => table).increment(1);
    }
}

pub mod hedonic {
    use super::MetricName;

    pub fn model_decided(verdict: &'static str, observations: usize, adj_r_squared: f64) {
        ::metrics::counter!(MetricName::HedonicVerdicts.as_str(), "verdict" => verdict).increment(1);
        ::metrics::gauge!(MetricName::HedonicObservations.as_str()).set(observations as f64);
        ::metrics::gauge!(MetricName::HedonicAdjRSquared.as_str()).set(adj_r_squared);
    }
}

/// Install the Prometheus recorder for in-process rendering.
///
/// Returns `None` when a recorder is already installed; the run carries on
/// without a snapshot in that case.
pub fn install_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus recorder installed");
            Some(handle)
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
            None
        }
    }
}

/// Write the rendered metrics next to the load log, textfile-collector style
pub fn write_snapshot(handle: &PrometheusHandle, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, handle.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_share_prefix() {
        let names = [
            MetricName::LoadAttempts,
            MetricName::NormalizeRowsNullYear,
            MetricName::AggregateExcludedKeys,
            MetricName::HedonicVerdicts,
        ];
        for name in names {
            assert!(name.as_str().starts_with("barrio_"));
            assert_eq!(name.to_string(), name.as_str());
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        load::attempt_succeeded("ine", 10, 0.01);
        load::attempt_failed("turismo", 0.02);
        aggregate::tags_repaired("source", 2);
    }
}
