use std::fmt;

use serde::{Deserialize, Serialize};

pub type BarrioId = u32;

pub const MIN_VALID_YEAR: i32 = 1900;
pub const MAX_VALID_YEAR: i32 = 2100;

/// The fact tables of the star schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Precios,
    Demografia,
    Vivienda,
    Turismo,
    MedioAmbiente,
}

/// How a metric column collapses when several rows share a business key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationRule {
    Sum,
    Mean,
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricColumn {
    pub name: &'static str,
    pub rule: AggregationRule,
}

const fn column(name: &'static str, rule: AggregationRule) -> MetricColumn {
    MetricColumn { name, rule }
}

const PRECIOS_COLUMNS: &[MetricColumn] = &[
    column("precio_m2_venta", AggregationRule::Mean),
    column("precio_mes_alquiler", AggregationRule::Mean),
    column("num_anuncios", AggregationRule::Sum),
];

const DEMOGRAFIA_COLUMNS: &[MetricColumn] = &[
    column("poblacion", AggregationRule::Sum),
    column("hogares", AggregationRule::Sum),
    column("tamano_hogar_min", AggregationRule::Mean),
];

const VIVIENDA_COLUMNS: &[MetricColumn] = &[
    column("superficie_m2", AggregationRule::Mean),
    column("antiguedad_anios", AggregationRule::Mean),
    column("plantas", AggregationRule::Mean),
    column("ascensor", AggregationRule::Mean),
];

const TURISMO_COLUMNS: &[MetricColumn] = &[
    column("plazas_hut", AggregationRule::Sum),
    column("pernoctaciones", AggregationRule::Sum),
];

const MEDIO_AMBIENTE_COLUMNS: &[MetricColumn] = &[
    column("ruido_db", AggregationRule::Mean),
    column("zonas_verdes_m2", AggregationRule::First),
];

impl FactKind {
    pub const ALL: [FactKind; 5] = [
        FactKind::Precios,
        FactKind::Demografia,
        FactKind::Vivienda,
        FactKind::Turismo,
        FactKind::MedioAmbiente,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Precios => "precios",
            FactKind::Demografia => "demografia",
            FactKind::Vivienda => "vivienda",
            FactKind::Turismo => "turismo",
            FactKind::MedioAmbiente => "medio_ambiente",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            FactKind::Precios => "fact_precios",
            FactKind::Demografia => "fact_demografia",
            FactKind::Vivienda => "fact_vivienda",
            FactKind::Turismo => "fact_turismo",
            FactKind::MedioAmbiente => "fact_medio_ambiente",
        }
    }

    /// Accepts the manifest `type` spelling (`precios`, `fact_precios`, `Medio-Ambiente`)
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace(['-', ' '], "_");
        let bare = normalized.strip_prefix("fact_").unwrap_or(&normalized);
        FactKind::ALL.into_iter().find(|kind| kind.as_str() == bare)
    }

    /// Whether `mes` is part of the business key
    pub fn has_month(&self) -> bool {
        matches!(self, FactKind::Precios | FactKind::Turismo)
    }

    pub fn columns(&self) -> &'static [MetricColumn] {
        match self {
            FactKind::Precios => PRECIOS_COLUMNS,
            FactKind::Demografia => DEMOGRAFIA_COLUMNS,
            FactKind::Vivienda => VIVIENDA_COLUMNS,
            FactKind::Turismo => TURISMO_COLUMNS,
            FactKind::MedioAmbiente => MEDIO_AMBIENTE_COLUMNS,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| c.name == name)
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric payload of one enriched row, one variant per fact table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactMetrics {
    Precios {
        precio_m2_venta: Option<f64>,
        precio_mes_alquiler: Option<f64>,
        num_anuncios: Option<f64>,
    },
    Demografia {
        poblacion: Option<f64>,
        hogares: Option<f64>,
        tamano_hogar_min: Option<f64>,
    },
    Vivienda {
        superficie_m2: Option<f64>,
        antiguedad_anios: Option<f64>,
        plantas: Option<f64>,
        ascensor: Option<f64>,
    },
    Turismo {
        plazas_hut: Option<f64>,
        pernoctaciones: Option<f64>,
    },
    MedioAmbiente {
        ruido_db: Option<f64>,
        zonas_verdes_m2: Option<f64>,
    },
}

impl FactMetrics {
    pub fn kind(&self) -> FactKind {
        match self {
            FactMetrics::Precios { .. } => FactKind::Precios,
            FactMetrics::Demografia { .. } => FactKind::Demografia,
            FactMetrics::Vivienda { .. } => FactKind::Vivienda,
            FactMetrics::Turismo { .. } => FactKind::Turismo,
            FactMetrics::MedioAmbiente { .. } => FactKind::MedioAmbiente,
        }
    }

    /// Values in the order of `FactKind::columns`
    pub fn values(&self) -> Vec<Option<f64>> {
        match *self {
            FactMetrics::Precios { precio_m2_venta, precio_mes_alquiler, num_anuncios } => {
                vec![precio_m2_venta, precio_mes_alquiler, num_anuncios]
            }
            FactMetrics::Demografia { poblacion, hogares, tamano_hogar_min } => {
                vec![poblacion, hogares, tamano_hogar_min]
            }
            FactMetrics::Vivienda { superficie_m2, antiguedad_anios, plantas, ascensor } => {
                vec![superficie_m2, antiguedad_anios, plantas, ascensor]
            }
            FactMetrics::Turismo { plazas_hut, pernoctaciones } => vec![plazas_hut, pernoctaciones],
            FactMetrics::MedioAmbiente { ruido_db, zonas_verdes_m2 } => vec![ruido_db, zonas_verdes_m2],
        }
    }

    fn validate(&self) -> Result<(), String> {
        let values = self.values();
        if values.iter().all(Option::is_none) {
            return Err(format!("{} row carries no metric values", self.kind()));
        }
        for (column, value) in self.kind().columns().iter().zip(&values) {
            if let Some(v) = value {
                if !v.is_finite() || *v < 0.0 {
                    return Err(format!("{} must be a non-negative number, got {}", column.name, v));
                }
            }
        }
        if let FactMetrics::Vivienda { ascensor: Some(share), .. } = self {
            if *share > 1.0 {
                return Err(format!("ascensor must be a share between 0 and 1, got {}", share));
            }
        }
        Ok(())
    }
}

/// One normalized observation, ready for tag repair and aggregation.
///
/// `anio` is not optional: rows whose year cannot be derived never become an
/// `EnrichedRow`. `barrio_id` stays optional because barrio resolution failures
/// are counted by the aggregator rather than dropped silently upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub barrio_id: Option<BarrioId>,
    pub anio: i32,
    pub mes: Option<u32>,
    pub source: String,
    pub dataset_id: String,
    pub metrics: FactMetrics,
}

impl EnrichedRow {
    /// Build a row, rejecting out-of-range years and months and invalid metrics.
    /// Months are discarded for fact kinds without a monthly grain.
    pub fn new(
        barrio_id: Option<BarrioId>,
        anio: i32,
        mes: Option<u32>,
        source: impl Into<String>,
        dataset_id: impl Into<String>,
        metrics: FactMetrics,
    ) -> Result<Self, String> {
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&anio) {
            return Err(format!("year {} outside {}..={}", anio, MIN_VALID_YEAR, MAX_VALID_YEAR));
        }
        if let Some(m) = mes {
            if !(1..=12).contains(&m) {
                return Err(format!("month {} outside 1..=12", m));
            }
        }
        metrics.validate()?;

        let mes = if metrics.kind().has_month() { mes } else { None };
        Ok(Self {
            barrio_id,
            anio,
            mes,
            source: source.into(),
            dataset_id: dataset_id.into(),
            metrics,
        })
    }

    pub fn kind(&self) -> FactKind {
        self.metrics.kind()
    }
}

/// Composite business key of a fact record: `(barrio_id, anio, [mes], source)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusinessKey {
    pub barrio_id: BarrioId,
    pub anio: i32,
    pub mes: Option<u32>,
    pub source: String,
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mes {
            Some(mes) => write!(
                f,
                "(barrio_id={}, anio={}, mes={}, source={})",
                self.barrio_id, self.anio, mes, self.source
            ),
            None => write!(
                f,
                "(barrio_id={}, anio={}, source={})",
                self.barrio_id, self.anio, self.source
            ),
        }
    }
}

/// One row of a persisted fact table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub kind: FactKind,
    pub key: BusinessKey,
    pub dataset_id: String,
    /// Number of enriched rows folded into this record
    pub row_count: usize,
    /// Values in the order of `FactKind::columns`
    pub metrics: Vec<Option<f64>>,
}

impl FactRecord {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.kind
            .column_index(name)
            .and_then(|idx| self.metrics.get(idx).copied().flatten())
    }
}

/// Static reference data for one barrio, owned by the bootstrap process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimBarrio {
    pub barrio_id: BarrioId,
    pub nombre: String,
    pub distrito: Option<String>,
    pub centroide_lat: Option<f64>,
    pub centroide_lon: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demografia(poblacion: Option<f64>) -> FactMetrics {
        FactMetrics::Demografia { poblacion, hogares: None, tamano_hogar_min: None }
    }

    #[test]
    fn test_fact_kind_parses_manifest_spellings() {
        assert_eq!(FactKind::parse("precios"), Some(FactKind::Precios));
        assert_eq!(FactKind::parse("fact_demografia"), Some(FactKind::Demografia));
        assert_eq!(FactKind::parse("Medio-Ambiente"), Some(FactKind::MedioAmbiente));
        assert_eq!(FactKind::parse("hoteles"), None);
    }

    #[test]
    fn test_metric_values_follow_column_order() {
        for kind in FactKind::ALL {
            assert!(!kind.columns().is_empty());
        }
        let metrics = FactMetrics::Vivienda {
            superficie_m2: Some(80.0),
            antiguedad_anios: None,
            plantas: Some(5.0),
            ascensor: Some(1.0),
        };
        assert_eq!(metrics.values().len(), FactKind::Vivienda.columns().len());
        assert_eq!(metrics.values()[2], Some(5.0));
    }

    #[test]
    fn test_enriched_row_rejects_invalid_year_and_empty_metrics() {
        assert!(EnrichedRow::new(Some(1), 1850, None, "ine", "d", demografia(Some(1.0))).is_err());
        assert!(EnrichedRow::new(Some(1), 2021, None, "ine", "d", demografia(None)).is_err());
        assert!(EnrichedRow::new(Some(1), 2021, None, "ine", "d", demografia(Some(-3.0))).is_err());
        assert!(EnrichedRow::new(Some(1), 2021, None, "ine", "d", demografia(Some(10.0))).is_ok());
    }

    #[test]
    fn test_enriched_row_drops_month_for_annual_tables() {
        let row = EnrichedRow::new(Some(1), 2021, Some(3), "ine", "d", demografia(Some(10.0))).unwrap();
        assert_eq!(row.mes, None);

        let precios = FactMetrics::Precios {
            precio_m2_venta: Some(4000.0),
            precio_mes_alquiler: None,
            num_anuncios: Some(1.0),
        };
        let row = EnrichedRow::new(Some(1), 2021, Some(3), "idealista", "d", precios).unwrap();
        assert_eq!(row.mes, Some(3));
        assert!(EnrichedRow::new(Some(1), 2021, Some(13), "idealista", "d", row.metrics.clone()).is_err());
    }
}
