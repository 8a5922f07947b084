use super::base::{number, ExtractLayout, SourceNormalizer};
use crate::constants::TURISMO;
use crate::domain::{FactKind, FactMetrics};
use crate::pipeline::ingestion::source_loader::RowView;
use crate::pipeline::processing::normalize::fields::TemporalFormat;

/// Normalizer for tourist-housing registers and overnight stays
#[derive(Debug, Default)]
pub struct TurismoNormalizer;

impl TurismoNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for TurismoNormalizer {
    fn source_id(&self) -> &str {
        TURISMO
    }

    fn name(&self) -> &str {
        "Turismo HUT"
    }

    fn kind(&self) -> FactKind {
        FactKind::Turismo
    }

    fn layout(&self) -> ExtractLayout {
        ExtractLayout::new(&["periodo", "fecha", "anio"], TemporalFormat::Auto)
    }

    fn extract_metrics(&self, row: &RowView<'_>, _anio: i32) -> Option<FactMetrics> {
        let plazas_hut = number(row, &["plazas_hut", "plazas", "places_hut"]);
        let pernoctaciones = number(row, &["pernoctaciones", "pernoctacions"]);
        if plazas_hut.is_none() && pernoctaciones.is_none() {
            return None;
        }
        Some(FactMetrics::Turismo { plazas_hut, pernoctaciones })
    }
}
