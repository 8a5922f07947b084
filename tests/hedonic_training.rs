use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use barrio_pipeline::domain::{BarrioId, BusinessKey, DimBarrio, FactKind, FactRecord};
use barrio_pipeline::error::HedonicError;
use barrio_pipeline::hedonic::artifact::{latest_accepted, persist, HedonicModelArtifact};
use barrio_pipeline::hedonic::dataset::{haversine_km, load_observations};
use barrio_pipeline::hedonic::{HedonicConfig, HedonicTrainer, ModelStage};
use barrio_pipeline::pipeline::storage::StarSchemaStore;

fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn record(kind: FactKind, barrio_id: BarrioId, mes: Option<u32>, source: &str, metrics: Vec<Option<f64>>) -> FactRecord {
    FactRecord {
        kind,
        key: BusinessKey { barrio_id, anio: 2023, mes, source: source.to_string() },
        dataset_id: format!("{}_2023", source),
        row_count: 1,
        metrics,
    }
}

/// Seed `n` barrios with centroids plus matching price and housing facts where
/// ln(price) = 2 ln(surface) - 0.004 age + 0.08 lift - 0.05 distance + noise
fn seed_synthetic_store(store: &mut StarSchemaStore, n: usize, seed: u64) -> Result<()> {
    let config = HedonicConfig::default();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut barrios = Vec::with_capacity(n);
    let mut precios = Vec::with_capacity(n);
    let mut vivienda = Vec::with_capacity(n);

    for i in 0..n {
        let barrio_id = i as BarrioId + 1;
        let lat = config.reference_lat + rng.gen_range(-0.06..0.06);
        let lon = config.reference_lon + rng.gen_range(-0.08..0.08);
        let distancia = haversine_km(lat, lon, config.reference_lat, config.reference_lon);

        let superficie: f64 = rng.gen_range(40.0..150.0);
        let antiguedad: f64 = rng.gen_range(0.0..100.0);
        let plantas = f64::from(rng.gen_range(1u32..10));
        let ascensor = if rng.gen_bool(0.6) { 1.0 } else { 0.0 };
        let ln_precio = 2.0 * superficie.ln() - 0.004 * antiguedad + 0.08 * ascensor - 0.05 * distancia
            + 0.05 * standard_normal(&mut rng);

        barrios.push(DimBarrio {
            barrio_id,
            nombre: format!("barrio {}", barrio_id),
            distrito: None,
            centroide_lat: Some(lat),
            centroide_lon: Some(lon),
        });
        precios.push(record(FactKind::Precios, barrio_id, Some(6), "portaldades", vec![Some(ln_precio.exp()), None, None]));
        vivienda.push(record(
            FactKind::Vivienda,
            barrio_id,
            None,
            "catastro",
            vec![Some(superficie), Some(antiguedad), Some(plantas), Some(ascensor)],
        ));
    }

    store.seed_barrios(&barrios)?;
    store.replace_fact_table(FactKind::Precios, &precios)?;
    store.replace_fact_table(FactKind::Vivienda, &vivienda)?;
    Ok(())
}

#[test]
fn test_synthetic_store_trains_accepted_model() -> Result<()> {
    let dir = tempdir()?;
    let mut store = StarSchemaStore::open(dir.path().join("barrios.db"))?;
    seed_synthetic_store(&mut store, 120, 42)?;

    let config = HedonicConfig::default();
    let observations = load_observations(&store, &config, "|")?;
    assert_eq!(observations.len(), 120);
    assert!(observations.iter().all(|o| o.provenance == "portaldades|catastro"));

    let verdict = HedonicTrainer::new(config).train(&observations)?;
    assert_eq!(verdict.stage(), ModelStage::Accepted);
    let model = verdict.model();
    assert!(model.fit().adj_r_squared > config.min_adj_r_squared);
    assert!((model.fit().coefficients[1] - 2.0).abs() < 0.1);

    let artifact = HedonicModelArtifact::from_verdict(&verdict);
    let path = persist(&store, &dir.path().join("models"), &artifact)?;
    assert!(path.exists());

    let current = latest_accepted(&store)?.expect("an accepted model is registered");
    assert_eq!(current.model_id, artifact.model_id);
    assert_eq!(current.n_observations, 120);
    Ok(())
}

#[test]
fn test_too_few_barrios_is_data_insufficient() -> Result<()> {
    let mut store = StarSchemaStore::open_in_memory()?;
    seed_synthetic_store(&mut store, 12, 3)?;

    let config = HedonicConfig::default();
    let observations = load_observations(&store, &config, "|")?;
    let err = HedonicTrainer::new(config).train(&observations).unwrap_err();
    assert_eq!(err, HedonicError::DataInsufficient { available: 12, required: 30 });

    // Nothing was persisted
    assert!(latest_accepted(&store)?.is_none());
    Ok(())
}

#[test]
fn test_rejected_model_keeps_previous_accepted() -> Result<()> {
    let dir = tempdir()?;
    let mut store = StarSchemaStore::open(dir.path().join("barrios.db"))?;
    seed_synthetic_store(&mut store, 120, 11)?;
    let observations = load_observations(&store, &HedonicConfig::default(), "|")?;

    let accepted = HedonicTrainer::default().train(&observations)?;
    assert!(accepted.is_accepted());
    let accepted = HedonicModelArtifact::from_verdict(&accepted);
    persist(&store, dir.path(), &accepted)?;

    let strict = HedonicConfig { min_adj_r_squared: 0.999_99, ..HedonicConfig::default() };
    let rejected = HedonicTrainer::new(strict).train(&observations)?;
    assert_eq!(rejected.stage(), ModelStage::Rejected);
    let rejected = HedonicModelArtifact::from_verdict(&rejected);
    assert!(!rejected.reasons.is_empty());
    persist(&store, dir.path(), &rejected)?;

    let current = latest_accepted(&store)?.expect("the accepted model is still registered");
    assert_eq!(current.model_id, accepted.model_id);
    Ok(())
}
