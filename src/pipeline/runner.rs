use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineSettings;
use crate::domain::FactKind;
use crate::error::Result;
use crate::metrics;
use crate::pipeline::ingestion::criticality::{CriticalityRouter, SkippedSource, SourceOutcome};
use crate::pipeline::ingestion::load_log::{LoadAttempt, LoadLog};
use crate::pipeline::ingestion::manifest::{read_manifest, ManifestEntry, ManifestIssue};
use crate::pipeline::ingestion::source_loader::{CsvExtractLoader, ExtractLoader};
use crate::pipeline::processing::aggregate::{aggregate, AggregateOptions, FactTable};
use crate::pipeline::processing::normalize::{NormalizationRegistry, NormalizedBatch};
use crate::pipeline::processing::tags::{dedupe_record_tags, dedupe_row_tags, normalize_tags, TagRepairs};
use crate::pipeline::storage::StarSchemaStore;

/// Row accounting for one loaded extract
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_name: String,
    pub dataset_id: String,
    pub kind: FactKind,
    pub input_rows: usize,
    pub normalized_rows: usize,
    pub dropped_null_year: usize,
    pub rejected_rows: usize,
    pub skipped_records: usize,
    pub excluded_keys: usize,
    pub records: usize,
}

/// What happened to one fact table in this run
#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub table: &'static str,
    pub rows_written: usize,
    pub sources: Vec<String>,
    pub excluded_null_key: usize,
    pub excluded_unknown_barrio: usize,
    pub tags_repaired: TagRepairs,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub manifest_entries: usize,
    pub manifest_skipped: Vec<ManifestIssue>,
    pub attempts: Vec<LoadAttempt>,
    pub sources: Vec<SourceSummary>,
    pub skipped_sources: Vec<SkippedSource>,
    pub tables: Vec<TableSummary>,
    /// Tables no source contributed to; their previous contents are untouched
    pub stale_tables: Vec<&'static str>,
}

impl RunReport {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            manifest_entries: 0,
            manifest_skipped: Vec::new(),
            attempts: Vec::new(),
            sources: Vec::new(),
            skipped_sources: Vec::new(),
            tables: Vec::new(),
            stale_tables: Vec::new(),
        }
    }

    /// Completed, but with optional sources or manifest entries missing
    pub fn is_degraded(&self) -> bool {
        !self.skipped_sources.is_empty() || !self.manifest_skipped.is_empty()
    }

    pub fn rows_written(&self) -> usize {
        self.tables.iter().map(|t| t.rows_written).sum()
    }

    pub fn warnings_summary(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for issue in &self.manifest_skipped {
            warnings.push(format!("manifest entry {} skipped: {}", issue.index, issue.reason));
        }
        for skipped in &self.skipped_sources {
            warnings.push(format!(
                "optional source '{}' ({}) absent after {} attempt(s): {}",
                skipped.source_name, skipped.dataset_id, skipped.attempts, skipped.cause
            ));
        }
        for table in &self.tables {
            let excluded = table.excluded_null_key + table.excluded_unknown_barrio;
            if excluded > 0 {
                warnings.push(format!("{}: {} rows excluded for unresolved keys", table.table, excluded));
            }
            if table.tags_repaired.total() > 0 {
                warnings.push(format!("{}: {} provenance tags repaired", table.table, table.tags_repaired.total()));
            }
        }
        for table in &self.stale_tables {
            warnings.push(format!("{}: no contributing source, previous version kept", table));
        }
        warnings
    }
}

#[derive(Default)]
struct TableAccumulator {
    excluded_null_key: usize,
    excluded_unknown_barrio: usize,
    tags_repaired: TagRepairs,
}

impl TableAccumulator {
    fn absorb(&mut self, other: TableAccumulator) {
        self.excluded_null_key += other.excluded_null_key;
        self.excluded_unknown_barrio += other.excluded_unknown_barrio;
        self.tags_repaired.add(other.tags_repaired);
    }
}

/// Repair tags, aggregate one loaded batch and merge it into its fact table.
/// On error nothing has been merged and `tables` is unchanged.
fn fold_batch(
    entry: &ManifestEntry,
    batch: NormalizedBatch,
    separator: &str,
    options: AggregateOptions<'_>,
    tables: &mut BTreeMap<FactKind, FactTable>,
) -> Result<(SourceSummary, TableAccumulator)> {
    let mut rows = batch.rows;
    let mut repairs = dedupe_row_tags(&mut rows, separator);
    let mut aggregation = aggregate(entry.kind, &rows, options)?;
    repairs.add(dedupe_record_tags(&mut aggregation.records, separator));

    let summary = SourceSummary {
        source_name: entry.source.clone(),
        dataset_id: entry.dataset_id.clone(),
        kind: entry.kind,
        input_rows: batch.input_rows,
        normalized_rows: rows.len(),
        dropped_null_year: batch.dropped_null_year,
        rejected_rows: batch.rejected_rows,
        skipped_records: batch.skipped_records,
        excluded_keys: aggregation.excluded(),
        records: aggregation.records.len(),
    };
    let counts = TableAccumulator {
        excluded_null_key: aggregation.excluded_null_key,
        excluded_unknown_barrio: aggregation.excluded_unknown_barrio,
        tags_repaired: repairs,
    };

    match tables.get_mut(&entry.kind) {
        Some(table) => table.merge(&entry.source, aggregation)?,
        None => {
            let mut table = FactTable::new(entry.kind);
            table.merge(&entry.source, aggregation)?;
            tables.insert(entry.kind, table);
        }
    }
    Ok((summary, counts))
}

/// Drives one batch run: manifest, per-source load under the criticality
/// policy, tag repair, aggregation and the final per-table writes
pub struct PipelineRunner {
    raw_dir: PathBuf,
    router: CriticalityRouter,
    registry: NormalizationRegistry,
    loader: Box<dyn ExtractLoader>,
    separator: String,
}

impl PipelineRunner {
    pub fn new(raw_dir: impl Into<PathBuf>, router: CriticalityRouter, separator: impl Into<String>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            router,
            registry: NormalizationRegistry::new(),
            loader: Box::new(CsvExtractLoader::new()),
            separator: separator.into(),
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        let router = CriticalityRouter::new(settings.criticality_policy(), settings.retry_policy())
            .with_load_log(LoadLog::new(&settings.paths.load_log));
        Self::new(&settings.paths.raw_dir, router, &settings.tags.separator)
    }

    pub fn with_loader(mut self, loader: Box<dyn ExtractLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_registry(mut self, registry: NormalizationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    #[instrument(skip_all, fields(raw_dir = %self.raw_dir.display()))]
    pub fn run(&mut self, store: &mut StarSchemaStore) -> Result<RunReport> {
        let mut report = RunReport::new(Uuid::new_v4(), Utc::now());
        self.router.set_run_id(report.run_id.to_string());
        info!(run_id = %report.run_id, "Starting pipeline run");

        let mut manifest = read_manifest(&self.raw_dir);
        for entry in &mut manifest.entries {
            let source = normalize_tags(&entry.source, &self.separator);
            if !source.is_empty() {
                entry.source = source;
            }
        }
        report.manifest_entries = manifest.entries.len();
        report.manifest_skipped = manifest.skipped.clone();
        if manifest.is_empty() {
            info!("Manifest has no valid entries; nothing to do");
            report.stale_tables = FactKind::ALL.iter().map(|k| k.table_name()).collect();
            report.finished_at = Utc::now();
            return Ok(report);
        }
        self.router.check_manifest_coverage(&manifest.entries)?;

        let known_barrios = store.known_barrio_ids()?;
        if known_barrios.is_none() {
            warn!("dim_barrios is empty; barrio ids are not checked against the dimension");
        }
        let options = AggregateOptions { separator: &self.separator, known_barrios: known_barrios.as_ref() };

        let mut tables: BTreeMap<FactKind, FactTable> = BTreeMap::new();
        let mut accumulators: BTreeMap<FactKind, TableAccumulator> = BTreeMap::new();

        for entry in &manifest.entries {
            let span = info_span!("source", source = %entry.source, dataset_id = %entry.dataset_id);
            let _enter = span.enter();

            let loader = &self.loader;
            let registry = &self.registry;
            let outcome = self.router.route(entry, || {
                let extract = loader.load(entry)?;
                registry.normalize(&extract)
            })?;

            let batch = match outcome {
                SourceOutcome::Loaded(batch) => batch,
                SourceOutcome::Absent(skipped) => {
                    report.skipped_sources.push(skipped);
                    continue;
                }
            };

            match fold_batch(entry, batch, &self.separator, options, &mut tables) {
                Ok((summary, counts)) => {
                    report.sources.push(summary);
                    accumulators.entry(entry.kind).or_default().absorb(counts);
                }
                // Data-quality violations only abort the run for critical sources
                Err(e) if !self.router.policy().is_critical(&entry.source) => {
                    warn!(
                        source = %entry.source,
                        dataset_id = %entry.dataset_id,
                        "Optional source dropped from this run: {}",
                        e
                    );
                    metrics::load::source_skipped(&entry.source);
                    report.skipped_sources.push(SkippedSource {
                        source_name: entry.source.clone(),
                        dataset_id: entry.dataset_id.clone(),
                        cause: e.to_string(),
                        attempts: self.router.attempt_count(entry),
                    });
                }
                Err(e) => {
                    error!(
                        source = %entry.source,
                        dataset_id = %entry.dataset_id,
                        "Critical source failed aggregation, aborting run: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }

        // Tables are written only once every source has been processed
        for (kind, table) in &tables {
            let rows_written = store.replace_fact_table(*kind, &table.records())?;
            let acc = accumulators.remove(kind).unwrap_or_default();
            report.tables.push(TableSummary {
                table: kind.table_name(),
                rows_written,
                sources: table.contributing_sources().map(String::from).collect(),
                excluded_null_key: acc.excluded_null_key,
                excluded_unknown_barrio: acc.excluded_unknown_barrio,
                tags_repaired: acc.tags_repaired,
            });
        }
        for kind in FactKind::ALL {
            if !tables.contains_key(&kind) {
                warn!("{} has no contributing source this run; previous version kept", kind.table_name());
                report.stale_tables.push(kind.table_name());
            }
        }

        report.attempts = self.router.take_attempts();
        report.finished_at = Utc::now();
        info!(
            run_id = %report.run_id,
            rows_written = report.rows_written(),
            skipped_sources = report.skipped_sources.len(),
            degraded = report.is_degraded(),
            "Pipeline run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingestion::criticality::{CriticalityPolicy, RetryPolicy};
    use std::fs;
    use tempfile::tempdir;

    fn runner(raw_dir: &Path) -> PipelineRunner {
        let router = CriticalityRouter::new(CriticalityPolicy::new(["ine"], ["turismo"]), RetryPolicy::none());
        PipelineRunner::new(raw_dir, router, "|")
    }

    #[test]
    fn test_missing_manifest_writes_nothing() {
        let dir = tempdir().unwrap();
        let mut store = StarSchemaStore::open_in_memory().unwrap();
        let report = runner(dir.path()).run(&mut store).unwrap();
        assert_eq!(report.manifest_entries, 0);
        assert!(report.tables.is_empty());
        assert_eq!(report.stale_tables.len(), FactKind::ALL.len());
    }

    #[test]
    fn test_missing_critical_manifest_entry_fails_before_writing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("turismo.csv"), "barrio_id,periodo,plazas_hut\n1,2023M01,10\n").unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"[{"file_path": "turismo.csv", "type": "turismo", "source": "turismo"}]"#,
        )
        .unwrap();

        let mut store = StarSchemaStore::open_in_memory().unwrap();
        let err = runner(dir.path()).run(&mut store).unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::CriticalSourceMissing(ref s) if s == "ine"));
        assert_eq!(store.count_fact(FactKind::Turismo).unwrap(), 0);
    }
}
