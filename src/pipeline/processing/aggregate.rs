use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{info, warn};

use crate::domain::{AggregationRule, BarrioId, BusinessKey, EnrichedRow, FactKind, FactRecord};
use crate::error::{PipelineError, Result};
use crate::metrics;
use crate::pipeline::processing::tags::join_tags;

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions<'a> {
    pub separator: &'a str,
    /// Barrios present in `dim_barrios`; `None` accepts any positive id
    pub known_barrios: Option<&'a HashSet<BarrioId>>,
}

/// One aggregated table contribution
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub kind: FactKind,
    pub records: Vec<FactRecord>,
    /// Rows without a barrio or source
    pub excluded_null_key: usize,
    /// Rows whose barrio is not in the dimension table
    pub excluded_unknown_barrio: usize,
}

impl Aggregation {
    pub fn excluded(&self) -> usize {
        self.excluded_null_key + self.excluded_unknown_barrio
    }
}

#[derive(Default)]
struct Group<'a> {
    rows: Vec<&'a EnrichedRow>,
}

/// Collapse enriched rows to one record per business key.
///
/// Rows of another fact kind fail the whole call.
pub fn aggregate(kind: FactKind, rows: &[EnrichedRow], options: AggregateOptions<'_>) -> Result<Aggregation> {
    let mut groups: BTreeMap<BusinessKey, Group<'_>> = BTreeMap::new();
    let mut excluded_null_key = 0usize;
    let mut excluded_unknown_barrio = 0usize;

    for row in rows {
        if row.kind() != kind {
            return Err(PipelineError::Config(format!(
                "{} row from {} passed to the {} aggregator",
                row.kind(),
                row.source,
                kind
            )));
        }
        let Some(barrio_id) = row.barrio_id else {
            excluded_null_key += 1;
            continue;
        };
        if row.source.trim().is_empty() {
            excluded_null_key += 1;
            continue;
        }
        if let Some(known) = options.known_barrios {
            if !known.contains(&barrio_id) {
                excluded_unknown_barrio += 1;
                continue;
            }
        }

        let key = BusinessKey {
            barrio_id,
            anio: row.anio,
            mes: if kind.has_month() { row.mes } else { None },
            source: row.source.clone(),
        };
        groups.entry(key).or_default().rows.push(row);
    }

    let records: Vec<FactRecord> = groups
        .into_iter()
        .map(|(key, group)| build_record(kind, key, &group.rows, options.separator))
        .collect();

    let table = kind.table_name();
    let excluded = excluded_null_key + excluded_unknown_barrio;
    if excluded > 0 {
        warn!(
            "{}: excluded {} rows with unresolved keys ({} null key, {} unknown barrio)",
            table, excluded, excluded_null_key, excluded_unknown_barrio
        );
    } else {
        info!("{}: excluded 0 rows with unresolved keys", table);
    }
    info!("{}: aggregated {} rows into {} records", table, rows.len() - excluded, records.len());
    metrics::aggregate::table_aggregated(table, records.len(), excluded);

    verify_unique_keys(kind, &records)?;
    Ok(Aggregation { kind, records, excluded_null_key, excluded_unknown_barrio })
}

fn build_record(kind: FactKind, key: BusinessKey, rows: &[&EnrichedRow], separator: &str) -> FactRecord {
    let values: Vec<Vec<Option<f64>>> = rows.iter().map(|row| row.metrics.values()).collect();
    let metrics = kind
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let present = values.iter().filter_map(|v| v.get(idx).copied().flatten());
            apply_rule(column.rule, present)
        })
        .collect();

    FactRecord {
        kind,
        key,
        dataset_id: join_tags(rows.iter().map(|row| row.dataset_id.as_str()), separator),
        row_count: rows.len(),
        metrics,
    }
}

/// Missing values are ignored; an all-missing group yields `None`
fn apply_rule(rule: AggregationRule, mut values: impl Iterator<Item = f64>) -> Option<f64> {
    match rule {
        AggregationRule::First => values.next(),
        AggregationRule::Sum => values.fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v)),
        AggregationRule::Mean => {
            let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            (count > 0).then(|| sum / count as f64)
        }
    }
}

/// Fail on any business key that appears more than once
pub fn verify_unique_keys(kind: FactKind, records: &[FactRecord]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for record in records {
        if !seen.insert(&record.key) {
            return Err(PipelineError::DuplicateBusinessKey {
                table: kind.table_name().to_string(),
                key: record.key.to_string(),
            });
        }
    }
    Ok(())
}

/// In-memory fact table accumulating the contributions of several sources
#[derive(Debug, Clone)]
pub struct FactTable {
    kind: FactKind,
    records: BTreeMap<BusinessKey, FactRecord>,
    contributing_sources: BTreeSet<String>,
}

impl FactTable {
    pub fn new(kind: FactKind) -> Self {
        Self { kind, records: BTreeMap::new(), contributing_sources: BTreeSet::new() }
    }

    pub fn kind(&self) -> FactKind {
        self.kind
    }

    /// Add an aggregation; a key already present is a duplicate and nothing is merged
    pub fn merge(&mut self, source_name: &str, aggregation: Aggregation) -> Result<()> {
        if let Some(dup) = aggregation.records.iter().find(|r| self.records.contains_key(&r.key)) {
            return Err(PipelineError::DuplicateBusinessKey {
                table: self.kind.table_name().to_string(),
                key: dup.key.to_string(),
            });
        }
        for record in aggregation.records {
            self.records.insert(record.key.clone(), record);
        }
        self.contributing_sources.insert(source_name.to_string());
        Ok(())
    }

    /// Records in business-key order
    pub fn records(&self) -> Vec<FactRecord> {
        self.records.values().cloned().collect()
    }

    pub fn contributing_sources(&self) -> impl Iterator<Item = &str> {
        self.contributing_sources.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
