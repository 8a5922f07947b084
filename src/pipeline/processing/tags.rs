//! Provenance tag repair for the `source` and `dataset_id` columns.
//!
//! Both columns may carry several tags joined by a separator. After
//! normalization no tag appears twice in a joined value.

use serde::Serialize;
use tracing::warn;

use crate::domain::{EnrichedRow, FactRecord};
use crate::metrics;

/// Split on `separator`, trim, drop empty tokens and exact duplicates
/// (first occurrence wins), then rejoin. An empty separator leaves the value
/// untouched.
pub fn normalize_tags(value: &str, separator: &str) -> String {
    if separator.is_empty() {
        return value.to_string();
    }
    let mut seen: Vec<&str> = Vec::new();
    for token in value.split(separator).map(str::trim).filter(|t| !t.is_empty()) {
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen.join(separator)
}

/// Whether some tag occurs more than once. Blank tokens and stray
/// whitespace are not duplicates.
pub fn has_duplicate_tags(value: &str, separator: &str) -> bool {
    if separator.is_empty() {
        return false;
    }
    let mut seen: Vec<&str> = Vec::new();
    for token in value.split(separator).map(str::trim).filter(|t| !t.is_empty()) {
        if seen.contains(&token) {
            return true;
        }
        seen.push(token);
    }
    false
}

/// Merge several tag values into one without duplicates, keeping first-seen order
pub fn join_tags<'a, I>(values: I, separator: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let joined: Vec<&str> = values.into_iter().collect();
    normalize_tags(&joined.join(separator), separator)
}

/// Number of values repaired per column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TagRepairs {
    pub source: usize,
    pub dataset_id: usize,
}

impl TagRepairs {
    pub fn total(&self) -> usize {
        self.source + self.dataset_id
    }

    pub fn add(&mut self, other: TagRepairs) {
        self.source += other.source;
        self.dataset_id += other.dataset_id;
    }
}

/// Normalize `value` in place; true only when a duplicate tag was removed
fn repair(value: &mut String, separator: &str) -> bool {
    let duplicated = has_duplicate_tags(value, separator);
    let normalized = normalize_tags(value, separator);
    if normalized != *value {
        *value = normalized;
    }
    duplicated
}

fn report(scope: &str, repairs: TagRepairs) {
    if repairs.total() > 0 {
        warn!(
            "Repaired duplicate provenance tags in {}: {} source value(s), {} dataset_id value(s)",
            scope, repairs.source, repairs.dataset_id
        );
        metrics::aggregate::tags_repaired("source", repairs.source);
        metrics::aggregate::tags_repaired("dataset_id", repairs.dataset_id);
    }
}

/// Repair tags on enriched rows before grouping, so the source part of the
/// business key is canonical
pub fn dedupe_row_tags(rows: &mut [EnrichedRow], separator: &str) -> TagRepairs {
    let mut repairs = TagRepairs::default();
    for row in rows.iter_mut() {
        if repair(&mut row.source, separator) {
            repairs.source += 1;
        }
        if repair(&mut row.dataset_id, separator) {
            repairs.dataset_id += 1;
        }
    }
    report("enriched rows", repairs);
    repairs
}

/// Repair tags on aggregated records before they are written
pub fn dedupe_record_tags(records: &mut [FactRecord], separator: &str) -> TagRepairs {
    let mut repairs = TagRepairs::default();
    for record in records.iter_mut() {
        if repair(&mut record.key.source, separator) {
            repairs.source += 1;
        }
        if repair(&mut record.dataset_id, separator) {
            repairs.dataset_id += 1;
        }
    }
    report("fact records", repairs);
    repairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FactMetrics;

    #[test]
    fn test_normalize_tags_removes_exact_duplicates_in_order() {
        assert_eq!(normalize_tags("ine|ine", "|"), "ine");
        assert_eq!(normalize_tags("ine|catastro|ine", "|"), "ine|catastro");
        assert_eq!(normalize_tags("catastro|ine", "|"), "catastro|ine");
        assert_eq!(normalize_tags("ine||ine|", "|"), "ine");
        assert_eq!(normalize_tags("ine | ine", "|"), "ine");
        assert_eq!(normalize_tags("", "|"), "");
        assert_eq!(normalize_tags("ine|ine", ""), "ine|ine");
    }

    #[test]
    fn test_normalize_tags_is_idempotent() {
        for value in ["a|b|a", "x", "a||b", "b|a|b|c|a"] {
            let once = normalize_tags(value, "|");
            assert_eq!(normalize_tags(&once, "|"), once);
            assert!(!has_duplicate_tags(&once, "|"));
        }
    }

    #[test]
    fn test_blank_tokens_are_not_duplicates() {
        assert!(!has_duplicate_tags("a||b", "|"));
        assert!(!has_duplicate_tags(" a", "|"));
        assert!(has_duplicate_tags("a| a", "|"));
        assert!(has_duplicate_tags("ine|ine", "|"));
    }

    #[test]
    fn test_whitespace_cleanup_is_not_counted_as_repair() {
        let metrics = FactMetrics::Demografia { poblacion: Some(1.0), hogares: None, tamano_hogar_min: None };
        let mut rows = vec![
            EnrichedRow::new(Some(1), 2021, None, "ine||catastro", " padron", metrics.clone()).unwrap(),
            EnrichedRow::new(Some(2), 2021, None, "ine|ine", "padron", metrics).unwrap(),
        ];

        let repairs = dedupe_row_tags(&mut rows, "|");
        assert_eq!(repairs, TagRepairs { source: 1, dataset_id: 0 });
        assert_eq!(rows[0].source, "ine|catastro");
        assert_eq!(rows[0].dataset_id, "padron");
        assert_eq!(rows[1].source, "ine");
    }

    #[test]
    fn test_join_tags_merges_without_duplicates() {
        assert_eq!(join_tags(["ds-1", "ds-2|ds-1", "ds-3"], "|"), "ds-1|ds-2|ds-3");
    }

    #[test]
    fn test_dedupe_row_tags_counts_repairs() {
        let metrics = FactMetrics::Demografia { poblacion: Some(1.0), hogares: None, tamano_hogar_min: None };
        let mut rows = vec![
            EnrichedRow::new(Some(1), 2021, None, "ine|ine", "padron", metrics.clone()).unwrap(),
            EnrichedRow::new(Some(2), 2021, None, "ine", "padron|padron", metrics.clone()).unwrap(),
            EnrichedRow::new(Some(3), 2021, None, "ine", "padron", metrics).unwrap(),
        ];

        let repairs = dedupe_row_tags(&mut rows, "|");
        assert_eq!(repairs, TagRepairs { source: 1, dataset_id: 1 });
        assert!(rows.iter().all(|r| r.source == "ine" && r.dataset_id == "padron"));
    }
}
