use super::base::{number, ExtractLayout, SourceNormalizer};
use crate::constants::IDEALISTA;
use crate::domain::{FactKind, FactMetrics};
use crate::pipeline::ingestion::source_loader::RowView;
use crate::pipeline::processing::normalize::fields::TemporalFormat;

/// Normalizer for listing-level portal extracts. Each row is one listing;
/// aggregation later averages prices and counts listings per barrio/month.
#[derive(Debug, Default)]
pub struct IdealistaNormalizer;

impl IdealistaNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceNormalizer for IdealistaNormalizer {
    fn source_id(&self) -> &str {
        IDEALISTA
    }

    fn name(&self) -> &str {
        "Idealista listings"
    }

    fn kind(&self) -> FactKind {
        FactKind::Precios
    }

    fn layout(&self) -> ExtractLayout {
        ExtractLayout::new(&["fecha", "fecha_publicacion", "periodo"], TemporalFormat::Auto)
    }

    fn extract_metrics(&self, row: &RowView<'_>, _anio: i32) -> Option<FactMetrics> {
        let precio = number(row, &["precio", "price"])?;
        let operacion = row.get(&["operacion", "operation"]).unwrap_or("venta").to_lowercase();

        let (precio_m2_venta, precio_mes_alquiler) = match operacion.as_str() {
            "venta" | "sale" => {
                let per_m2 = number(row, &["precio_m2", "price_by_area"]).or_else(|| {
                    number(row, &["superficie", "superficie_m2", "size"])
                        .filter(|area| *area > 0.0)
                        .map(|area| precio / area)
                });
                (Some(per_m2?), None)
            }
            "alquiler" | "rent" => (None, Some(precio)),
            _ => return None,
        };

        Some(FactMetrics::Precios { precio_m2_venta, precio_mes_alquiler, num_anuncios: Some(1.0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingestion::manifest::ManifestEntry;
    use crate::pipeline::ingestion::source_loader::CsvExtractLoader;
    use std::path::PathBuf;

    #[test]
    fn test_listing_rows_split_by_operation() {
        let entry = ManifestEntry {
            file_path: PathBuf::from("idealista.csv"),
            kind: FactKind::Precios,
            source: IDEALISTA.to_string(),
            dataset_id: "idealista-2023-05".to_string(),
        };
        let extract = CsvExtractLoader::parse_bytes(
            &entry,
            b"barrio_id,fecha,operacion,precio,superficie\n\
              12,2023-05-02,venta,300000,75\n\
              12,2023-05-09,alquiler,1400,60\n\
              12,2023-05-11,traspaso,50000,40\n\
              12,2023-05-12,venta,250000,\n",
        )
        .unwrap();

        let batch = IdealistaNormalizer::new().normalize(&extract).unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rejected_rows, 2);
        assert_eq!(
            batch.rows[0].metrics,
            FactMetrics::Precios { precio_m2_venta: Some(4000.0), precio_mes_alquiler: None, num_anuncios: Some(1.0) }
        );
        assert_eq!(batch.rows[1].mes, Some(5));
    }
}
