use std::collections::{BTreeMap, HashMap};

use tracing::info;

use super::{HedonicConfig, HedonicObservation};
use crate::domain::{BarrioId, DimBarrio, FactKind, FactRecord};
use crate::error::Result;
use crate::pipeline::processing::tags::join_tags;
use crate::pipeline::storage::StarSchemaStore;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[derive(Default)]
struct Accumulator {
    sums: Vec<f64>,
    counts: Vec<usize>,
    sources: Vec<String>,
}

impl Accumulator {
    fn add(&mut self, values: &[Option<f64>], source: &str) {
        if self.sums.is_empty() {
            self.sums = vec![0.0; values.len()];
            self.counts = vec![0; values.len()];
        }
        for (i, value) in values.iter().enumerate() {
            if let Some(v) = value {
                self.sums[i] += v;
                self.counts[i] += 1;
            }
        }
        self.sources.push(source.to_string());
    }

    fn mean(&self, idx: usize) -> Option<f64> {
        let count = *self.counts.get(idx)?;
        (count > 0).then(|| self.sums[idx] / count as f64)
    }
}

/// Per barrio-year means of the given fact columns across months and sources
fn collapse(records: &[FactRecord], columns: &[&str]) -> BTreeMap<(BarrioId, i32), Accumulator> {
    let mut grouped: BTreeMap<(BarrioId, i32), Accumulator> = BTreeMap::new();
    for record in records {
        let values: Vec<Option<f64>> = columns.iter().map(|c| record.metric(c)).collect();
        grouped
            .entry((record.key.barrio_id, record.key.anio))
            .or_default()
            .add(&values, &record.key.source);
    }
    grouped
}

/// Join sale prices with housing characteristics and barrio centroids.
///
/// One observation per barrio-year with a price. Missing housing data or
/// centroids leave the covariate empty; the trainer drops such rows.
pub fn build_observations(
    precios: &[FactRecord],
    vivienda: &[FactRecord],
    barrios: &[DimBarrio],
    config: &HedonicConfig,
    separator: &str,
) -> Vec<HedonicObservation> {
    let prices = collapse(precios, &["precio_m2_venta"]);
    let housing = collapse(vivienda, &["superficie_m2", "antiguedad_anios", "plantas", "ascensor"]);
    let centroids: HashMap<BarrioId, (f64, f64)> = barrios
        .iter()
        .filter_map(|b| Some((b.barrio_id, (b.centroide_lat?, b.centroide_lon?))))
        .collect();

    let observations: Vec<HedonicObservation> = prices
        .iter()
        .filter_map(|(&(barrio_id, anio), price)| {
            let precio = price.mean(0)?;
            let house = housing.get(&(barrio_id, anio));
            let metric = |idx: usize| house.and_then(|h| h.mean(idx));
            let provenance = join_tags(
                price
                    .sources
                    .iter()
                    .chain(house.map(|h| h.sources.iter()).into_iter().flatten())
                    .map(String::as_str),
                separator,
            );
            Some(HedonicObservation {
                barrio_id,
                anio,
                precio: Some(precio),
                superficie_m2: metric(0),
                antiguedad_anios: metric(1),
                plantas: metric(2),
                ascensor: metric(3),
                distancia_centro_km: centroids
                    .get(&barrio_id)
                    .map(|(lat, lon)| haversine_km(*lat, *lon, config.reference_lat, config.reference_lon)),
                provenance,
            })
        })
        .collect();

    info!(
        "Built {} hedonic observations from {} price and {} housing records",
        observations.len(),
        precios.len(),
        vivienda.len()
    );
    observations
}

/// Read the fact tables and dimension from the store and join them
pub fn load_observations(
    store: &StarSchemaStore,
    config: &HedonicConfig,
    separator: &str,
) -> Result<Vec<HedonicObservation>> {
    let precios = store.read_fact_table(FactKind::Precios)?;
    let vivienda = store.read_fact_table(FactKind::Vivienda)?;
    let barrios = store.load_barrios()?;
    Ok(build_observations(&precios, &vivienda, &barrios, config, separator))
}
