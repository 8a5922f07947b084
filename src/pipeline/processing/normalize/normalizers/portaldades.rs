use super::base::{number, ExtractLayout, SourceNormalizer};
use crate::constants::PORTALDADES;
use crate::domain::{FactKind, FactMetrics};
use crate::pipeline::ingestion::source_loader::RowView;
use crate::pipeline::processing::normalize::fields::TemporalFormat;

/// Normalizer for the municipal open-data price series (sale price per m² and
/// monthly rent). Reference dates are ISO dates or INE-style period codes.
#[derive(Debug, Default)]
pub struct PortalDadesNormalizer;

impl PortalDadesNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for PortalDadesNormalizer {
    fn source_id(&self) -> &str {
        PORTALDADES
    }

    fn name(&self) -> &str {
        "Portal de Dades"
    }

    fn kind(&self) -> FactKind {
        FactKind::Precios
    }

    fn layout(&self) -> ExtractLayout {
        ExtractLayout::new(&["data_referencia", "periodo", "fecha", "anio"], TemporalFormat::Auto)
    }

    fn extract_metrics(&self, row: &RowView<'_>, _anio: i32) -> Option<FactMetrics> {
        let precio_m2_venta = number(row, &["precio_m2_venta", "preu_m2", "euros_m2"]);
        let precio_mes_alquiler = number(row, &["precio_mes_alquiler", "lloguer_mensual", "renta_mensual"]);
        let num_anuncios = number(row, &["num_anuncios", "num_contratos", "contractes"]);

        if precio_m2_venta.is_none() && precio_mes_alquiler.is_none() {
            return None;
        }
        Some(FactMetrics::Precios { precio_m2_venta, precio_mes_alquiler, num_anuncios })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingestion::manifest::ManifestEntry;
    use crate::pipeline::ingestion::source_loader::CsvExtractLoader;
    use std::path::PathBuf;

    #[test]
    fn test_monthly_prices_keep_month() {
        let entry = ManifestEntry {
            file_path: PathBuf::from("portaldades.csv"),
            kind: FactKind::Precios,
            source: PORTALDADES.to_string(),
            dataset_id: "pd-preus".to_string(),
        };
        let extract = CsvExtractLoader::parse_bytes(
            &entry,
            "codi_barri;data_referencia;preu_m2;lloguer_mensual\n\
             7;2022-03-01;4.512,30;1150\n\
             7;2022M04;..;..\n"
                .as_bytes(),
        )
        .unwrap();

        let batch = PortalDadesNormalizer::new().normalize(&extract).unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rejected_rows, 1);
        assert_eq!(batch.rows[0].mes, Some(3));
        assert_eq!(
            batch.rows[0].metrics,
            FactMetrics::Precios {
                precio_m2_venta: Some(4512.3),
                precio_mes_alquiler: Some(1150.0),
                num_anuncios: None
            }
        );
    }
}
