pub mod fields;
pub mod normalizers;
pub mod registry;

use serde::Serialize;

use crate::domain::{EnrichedRow, FactKind};

pub use fields::{derive_month, derive_year, parse_household_size, TemporalFormat};
pub use normalizers::SourceNormalizer;
pub use registry::NormalizationRegistry;

/// Enriched rows produced from one raw extract, with the row accounting the
/// run report needs
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedBatch {
    pub kind: FactKind,
    pub source_name: String,
    pub dataset_id: String,
    pub rows: Vec<EnrichedRow>,
    /// Data rows in the extract
    pub input_rows: usize,
    /// Rows whose year could not be derived
    pub dropped_null_year: usize,
    /// Rows whose barrio or metrics failed to parse
    pub rejected_rows: usize,
    /// Records skipped by the reader before normalization
    pub skipped_records: usize,
    pub checksum: String,
}

impl NormalizedBatch {
    pub fn empty(kind: FactKind, source_name: &str) -> Self {
        Self {
            kind,
            source_name: source_name.to_string(),
            dataset_id: String::new(),
            rows: Vec::new(),
            input_rows: 0,
            dropped_null_year: 0,
            rejected_rows: 0,
            skipped_records: 0,
            checksum: String::new(),
        }
    }
}
