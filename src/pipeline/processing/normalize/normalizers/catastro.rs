use super::base::{number, ExtractLayout, SourceNormalizer};
use crate::constants::CATASTRO;
use crate::domain::{FactKind, FactMetrics};
use crate::pipeline::ingestion::source_loader::RowView;
use crate::pipeline::processing::normalize::fields::{parse_flag, TemporalFormat};

/// Normalizer for cadastral building stock extracts
#[derive(Debug, Default)]
pub struct CatastroNormalizer;

impl CatastroNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for CatastroNormalizer {
    fn source_id(&self) -> &str {
        CATASTRO
    }

    fn name(&self) -> &str {
        "Catastro"
    }

    fn kind(&self) -> FactKind {
        FactKind::Vivienda
    }

    fn layout(&self) -> ExtractLayout {
        ExtractLayout::new(&["anio", "año", "periodo", "fecha"], TemporalFormat::Auto)
    }

    fn extract_metrics(&self, row: &RowView<'_>, anio: i32) -> Option<FactMetrics> {
        let superficie_m2 = number(row, &["superficie_m2", "superficie", "sup_construida"]);
        // Age is published directly or derived from the construction year
        let antiguedad_anios = number(row, &["antiguedad_anios", "antiguedad"]).or_else(|| {
            number(row, &["anio_construccion", "ano_construccion", "any_construccio"])
                .map(|built| f64::from(anio) - built)
                .filter(|age| *age >= 0.0)
        });
        let plantas = number(row, &["plantas", "num_plantas"]);
        let ascensor = row.get(&["ascensor", "tiene_ascensor"]).and_then(parse_flag);

        let metrics = FactMetrics::Vivienda { superficie_m2, antiguedad_anios, plantas, ascensor };
        metrics.values().iter().any(Option::is_some).then_some(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingestion::manifest::ManifestEntry;
    use crate::pipeline::ingestion::source_loader::CsvExtractLoader;
    use std::path::PathBuf;

    #[test]
    fn test_age_derived_from_construction_year() {
        let entry = ManifestEntry {
            file_path: PathBuf::from("catastro.csv"),
            kind: FactKind::Vivienda,
            source: CATASTRO.to_string(),
            dataset_id: "catastro-2021".to_string(),
        };
        let extract = CsvExtractLoader::parse_bytes(
            &entry,
            b"barrio_id,anio,superficie_m2,anio_construccion,plantas,ascensor\n\
              3,2021,85.5,1961,6,si\n\
              4,2021,,,,\n",
        )
        .unwrap();

        let batch = CatastroNormalizer::new().normalize(&extract).unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rejected_rows, 1);
        assert_eq!(
            batch.rows[0].metrics,
            FactMetrics::Vivienda {
                superficie_m2: Some(85.5),
                antiguedad_anios: Some(60.0),
                plantas: Some(6.0),
                ascensor: Some(1.0)
            }
        );
    }
}
