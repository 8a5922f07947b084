use tracing::{debug, info, warn};

use crate::domain::{EnrichedRow, FactKind, FactMetrics};
use crate::error::LoadError;
use crate::metrics;
use crate::pipeline::ingestion::source_loader::{RawExtract, RowView};
use crate::pipeline::processing::normalize::fields::{
    derive_month, derive_year, parse_barrio_id, parse_month, parse_number, TemporalFormat,
};
use crate::pipeline::processing::normalize::NormalizedBatch;

/// Column aliases accepted for the barrio code
pub const BARRIO_COLUMNS: &[&str] = &["barrio_id", "codi_barri", "codigo_barrio", "cod_barrio", "barri"];

const MONTH_COLUMNS: &[&str] = &["mes", "month"];
const SOURCE_COLUMNS: &[&str] = &["source", "fuente"];
const DATASET_COLUMNS: &[&str] = &["dataset_id", "dataset"];

/// Where a source keeps its key columns
#[derive(Debug, Clone, Copy)]
pub struct ExtractLayout {
    pub barrio_columns: &'static [&'static str],
    pub temporal_columns: &'static [&'static str],
    pub temporal_format: TemporalFormat,
}

impl ExtractLayout {
    pub const fn new(temporal_columns: &'static [&'static str], temporal_format: TemporalFormat) -> Self {
        Self { barrio_columns: BARRIO_COLUMNS, temporal_columns, temporal_format }
    }
}

/// Source-specific normalization of one raw extract into enriched rows
pub trait SourceNormalizer: Send + Sync {
    /// Source name as declared in the manifest
    fn source_id(&self) -> &str;

    /// Human-readable name for logs
    fn name(&self) -> &str;

    fn kind(&self) -> FactKind;

    fn layout(&self) -> ExtractLayout;

    /// Metric payload of one row, `None` when the row carries no usable value.
    /// `anio` is the already-derived year of the row.
    fn extract_metrics(&self, row: &RowView<'_>, anio: i32) -> Option<FactMetrics>;

    fn normalize(&self, extract: &RawExtract) -> Result<NormalizedBatch, LoadError> {
        let layout = self.layout();
        if !extract.has_column(layout.barrio_columns) {
            return Err(LoadError::SchemaMismatch(format!(
                "{} has no barrio column (expected one of {:?})",
                extract.path.display(),
                layout.barrio_columns
            )));
        }
        if !extract.has_column(layout.temporal_columns) {
            return Err(LoadError::SchemaMismatch(format!(
                "{} has no temporal column (expected one of {:?})",
                extract.path.display(),
                layout.temporal_columns
            )));
        }

        let mut batch = NormalizedBatch::empty(self.kind(), &extract.source);
        batch.dataset_id = extract.dataset_id.clone();
        batch.input_rows = extract.row_count();
        batch.skipped_records = extract.skipped_rows;
        batch.checksum = extract.checksum.clone();

        for row in extract.rows() {
            let temporal = row.get(layout.temporal_columns).unwrap_or_default();
            let Some(anio) = derive_year(temporal, layout.temporal_format) else {
                debug!(source = %extract.source, line = row.line, "Dropping row with underivable year '{}'", temporal);
                batch.dropped_null_year += 1;
                continue;
            };
            // Annual kinds ignore any month column
            let mes = if !self.kind().has_month() {
                None
            } else if let Some(cell) = row.get(MONTH_COLUMNS) {
                let mes = parse_month(cell);
                if mes.is_none() {
                    debug!(source = %extract.source, line = row.line, "Ignoring invalid month '{}'", cell);
                }
                mes
            } else {
                derive_month(temporal, layout.temporal_format)
            };
            let barrio_id = row.get(layout.barrio_columns).and_then(parse_barrio_id);

            let Some(metrics) = self.extract_metrics(&row, anio) else {
                debug!(source = %extract.source, line = row.line, "Rejecting row without usable metrics");
                batch.rejected_rows += 1;
                continue;
            };

            let source = row.get(SOURCE_COLUMNS).unwrap_or(extract.source.as_str());
            let dataset_id = row.get(DATASET_COLUMNS).unwrap_or(extract.dataset_id.as_str());
            match EnrichedRow::new(barrio_id, anio, mes, source, dataset_id, metrics) {
                Ok(enriched) => batch.rows.push(enriched),
                Err(reason) => {
                    debug!(source = %extract.source, line = row.line, "Rejecting row: {}", reason);
                    batch.rejected_rows += 1;
                }
            }
        }

        if batch.dropped_null_year > 0 {
            warn!(
                "{}: dropped {} rows whose year could not be derived",
                self.name(),
                batch.dropped_null_year
            );
        }
        if batch.rejected_rows > 0 {
            warn!("{}: rejected {} rows with invalid metrics", self.name(), batch.rejected_rows);
        }
        info!(
            "{}: normalized {} of {} rows from {}",
            self.name(),
            batch.rows.len(),
            batch.input_rows,
            extract.dataset_id
        );
        metrics::normalize::batch_normalized(
            &extract.source,
            batch.rows.len(),
            batch.dropped_null_year,
            batch.rejected_rows,
        );

        Ok(batch)
    }
}

/// Numeric value of the first matching column
pub fn number(row: &RowView<'_>, aliases: &[&str]) -> Option<f64> {
    row.get(aliases).and_then(parse_number)
}
