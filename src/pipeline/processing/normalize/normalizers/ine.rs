use super::base::{number, ExtractLayout, SourceNormalizer};
use crate::constants::INE;
use crate::domain::{FactKind, FactMetrics};
use crate::pipeline::ingestion::source_loader::RowView;
use crate::pipeline::processing::normalize::fields::{parse_household_size, TemporalFormat};

/// Normalizer for INE padrón extracts (population and households per barrio).
/// Periods come as INE codes such as `2021M01` or plain years.
#[derive(Debug, Default)]
pub struct IneNormalizer;

impl IneNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for IneNormalizer {
    fn source_id(&self) -> &str {
        INE
    }

    fn name(&self) -> &str {
        "INE Padrón"
    }

    fn kind(&self) -> FactKind {
        FactKind::Demografia
    }

    fn layout(&self) -> ExtractLayout {
        ExtractLayout::new(&["periodo", "anio", "año", "any"], TemporalFormat::PeriodCode)
    }

    fn extract_metrics(&self, row: &RowView<'_>, _anio: i32) -> Option<FactMetrics> {
        let poblacion = number(row, &["poblacion", "habitantes", "total"]);
        let hogares = number(row, &["hogares", "num_hogares", "llars"]);
        let tamano_hogar_min = row
            .get(&["tamano_hogar", "tamaño_hogar", "personas_hogar"])
            .and_then(parse_household_size)
            .map(f64::from);

        if poblacion.is_none() && hogares.is_none() && tamano_hogar_min.is_none() {
            return None;
        }
        Some(FactMetrics::Demografia { poblacion, hogares, tamano_hogar_min })
    }
}
