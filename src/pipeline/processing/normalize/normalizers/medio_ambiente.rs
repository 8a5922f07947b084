use super::base::{number, ExtractLayout, SourceNormalizer};
use crate::constants::MEDIO_AMBIENTE;
use crate::domain::{FactKind, FactMetrics};
use crate::pipeline::ingestion::source_loader::RowView;
use crate::pipeline::processing::normalize::fields::TemporalFormat;

/// Normalizer for noise maps and green-area inventories
#[derive(Debug, Default)]
pub struct MedioAmbienteNormalizer;

impl MedioAmbienteNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for MedioAmbienteNormalizer {
    fn source_id(&self) -> &str {
        MEDIO_AMBIENTE
    }

    fn name(&self) -> &str {
        "Medio ambiente"
    }

    fn kind(&self) -> FactKind {
        FactKind::MedioAmbiente
    }

    fn layout(&self) -> ExtractLayout {
        ExtractLayout::new(&["anio", "año", "periodo"], TemporalFormat::Auto)
    }

    fn extract_metrics(&self, row: &RowView<'_>, _anio: i32) -> Option<FactMetrics> {
        let ruido_db = number(row, &["ruido_db", "nivel_ruido", "lden"]);
        let zonas_verdes_m2 = number(row, &["zonas_verdes_m2", "superficie_verde_m2", "verde_m2"]);
        if ruido_db.is_none() && zonas_verdes_m2.is_none() {
            return None;
        }
        Some(FactMetrics::MedioAmbiente { ruido_db, zonas_verdes_m2 })
    }
}
