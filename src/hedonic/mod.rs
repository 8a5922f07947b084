//! Hedonic price model: OLS of log price on dwelling and location
//! characteristics, gated by a fixed diagnostic battery.
//!
//! The lifecycle is expressed as typestate values:
//! `UntrainedModel::fit` -> `FittedModel::diagnose` -> `DiagnosedModel::decide`
//! -> `ModelVerdict::{Accepted, Rejected}`. A rejected model is returned to the
//! caller like an accepted one; nothing here replaces a previously accepted model.

pub mod artifact;
pub mod dataset;
pub mod diagnostics;
pub mod linalg;
pub mod ols;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants;
use crate::domain::BarrioId;
use crate::error::HedonicError;
use crate::metrics;
use diagnostics::{run_diagnostics, DiagnosticReport, DiagnosticThresholds, SignPrior};
use linalg::{dot, Matrix};
use ols::OlsFit;

pub use artifact::{latest_accepted, HedonicModelArtifact};
pub use dataset::build_observations;

/// Regression terms in design-matrix order, with their expected signs
pub const TERMS: [(&str, SignPrior); 6] = [
    ("intercept", SignPrior::Free),
    ("ln_superficie", SignPrior::Positive),
    ("antiguedad", SignPrior::Negative),
    ("plantas", SignPrior::Free),
    ("ascensor", SignPrior::Positive),
    ("distancia_centro_km", SignPrior::Negative),
];

/// One barrio-year joined from the price and housing tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedonicObservation {
    pub barrio_id: BarrioId,
    pub anio: i32,
    pub precio: Option<f64>,
    pub superficie_m2: Option<f64>,
    pub antiguedad_anios: Option<f64>,
    pub plantas: Option<f64>,
    pub ascensor: Option<f64>,
    pub distancia_centro_km: Option<f64>,
    /// Joined source tags of the contributing records
    pub provenance: String,
}

impl HedonicObservation {
    /// Complete covariates and the response, or `None` when anything is
    /// missing or price/surface are not positive
    fn usable(&self) -> Option<(Covariates, f64)> {
        let precio = self.precio.filter(|p| *p > 0.0)?;
        let covariates = Covariates {
            superficie_m2: self.superficie_m2.filter(|s| *s > 0.0)?,
            antiguedad_anios: self.antiguedad_anios?,
            plantas: self.plantas?,
            ascensor: self.ascensor?,
            distancia_centro_km: self.distancia_centro_km?,
        };
        Some((covariates, precio))
    }
}

/// Inputs for a price prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Covariates {
    pub superficie_m2: f64,
    pub antiguedad_anios: f64,
    pub plantas: f64,
    pub ascensor: f64,
    pub distancia_centro_km: f64,
}

impl Covariates {
    pub(crate) fn design_row(&self) -> Vec<f64> {
        vec![
            1.0,
            self.superficie_m2.ln(),
            self.antiguedad_anios,
            self.plantas,
            self.ascensor,
            self.distancia_centro_km,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HedonicConfig {
    pub min_observations: usize,
    pub min_adj_r_squared: f64,
    /// Diagnostics out of five that must pass for acceptance
    pub min_passing_diagnostics: usize,
    pub thresholds: DiagnosticThresholds,
    pub reference_lat: f64,
    pub reference_lon: f64,
}

impl Default for HedonicConfig {
    fn default() -> Self {
        Self {
            min_observations: 30,
            min_adj_r_squared: 0.5,
            min_passing_diagnostics: 4,
            thresholds: DiagnosticThresholds::default(),
            reference_lat: constants::REFERENCE_CENTER_LAT,
            reference_lon: constants::REFERENCE_CENTER_LON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStage {
    Untrained,
    Fitted,
    Diagnosed,
    Accepted,
    Rejected,
}

impl ModelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStage::Untrained => "untrained",
            ModelStage::Fitted => "fitted",
            ModelStage::Diagnosed => "diagnosed",
            ModelStage::Accepted => "accepted",
            ModelStage::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct UntrainedModel {
    config: HedonicConfig,
}

impl UntrainedModel {
    pub fn new(config: HedonicConfig) -> Self {
        Self { config }
    }

    pub fn stage(&self) -> ModelStage {
        ModelStage::Untrained
    }

    /// Fit on the usable observations. Rows with a missing covariate or a
    /// non-positive price or surface are dropped first.
    pub fn fit(self, observations: &[HedonicObservation]) -> Result<FittedModel, HedonicError> {
        let usable: Vec<(Covariates, f64)> = observations.iter().filter_map(HedonicObservation::usable).collect();
        let dropped = observations.len() - usable.len();
        if dropped > 0 {
            info!("Dropped {} of {} observations with incomplete covariates", dropped, observations.len());
        }

        let required = self.config.min_observations.max(TERMS.len() + 1);
        if usable.len() < required {
            warn!("Hedonic fit needs {} usable observations, found {}", required, usable.len());
            return Err(HedonicError::DataInsufficient { available: usable.len(), required });
        }

        let rows: Vec<Vec<f64>> = usable.iter().map(|(c, _)| c.design_row()).collect();
        let y: Vec<f64> = usable.iter().map(|(_, precio)| precio.ln()).collect();
        let design = Matrix::from_rows(&rows);
        let fit = ols::fit(&design, &y)?;

        info!(
            observations = fit.n,
            r_squared = fit.r_squared,
            adj_r_squared = fit.adj_r_squared,
            "Hedonic model fitted"
        );
        Ok(FittedModel { config: self.config, design, fit, dropped_incomplete: dropped })
    }
}

#[derive(Debug, Clone)]
pub struct FittedModel {
    config: HedonicConfig,
    design: Matrix,
    fit: OlsFit,
    dropped_incomplete: usize,
}

impl FittedModel {
    pub fn stage(&self) -> ModelStage {
        ModelStage::Fitted
    }

    pub fn fit(&self) -> &OlsFit {
        &self.fit
    }

    pub fn dropped_incomplete(&self) -> usize {
        self.dropped_incomplete
    }

    /// Price predicted for the given covariates
    pub fn predict(&self, covariates: &Covariates) -> f64 {
        dot(&self.fit.coefficients, &covariates.design_row()).exp()
    }

    pub fn diagnose(self) -> DiagnosedModel {
        let names: Vec<&str> = TERMS.iter().map(|(name, _)| *name).collect();
        let priors: Vec<SignPrior> = TERMS.iter().map(|(_, prior)| *prior).collect();
        let report = run_diagnostics(&self.design, &self.fit, &names, &priors, &self.config.thresholds);

        for result in &report.results {
            info!(test = %result.test, passed = result.passed, "{}", result.detail);
        }
        DiagnosedModel { fitted: self, report }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosedModel {
    fitted: FittedModel,
    report: DiagnosticReport,
}

impl DiagnosedModel {
    pub fn stage(&self) -> ModelStage {
        ModelStage::Diagnosed
    }

    pub fn report(&self) -> &DiagnosticReport {
        &self.report
    }

    /// Accepted iff adjusted R² and the number of passing diagnostics both
    /// reach their thresholds
    pub fn decide(self) -> ModelVerdict {
        let config = self.fitted.config;
        let adj_r_squared = self.fitted.fit.adj_r_squared;
        let passing = self.report.passing_count();

        // NaN fails the comparison and therefore the gate
        let fit_ok = adj_r_squared >= config.min_adj_r_squared;
        let mut reasons = Vec::new();
        if !fit_ok {
            reasons.push(format!(
                "adjusted R² {:.3} below {:.3}",
                adj_r_squared, config.min_adj_r_squared
            ));
        }
        if passing < config.min_passing_diagnostics {
            reasons.push(format!(
                "{} of {} diagnostics passed, {} required",
                passing,
                self.report.results.len(),
                config.min_passing_diagnostics
            ));
        }

        let model = TrainedModel { fitted: self.fitted, report: self.report, reasons };
        let verdict = if model.reasons.is_empty() {
            info!(adj_r_squared, passing, "Hedonic model accepted");
            ModelVerdict::Accepted(model)
        } else {
            warn!(adj_r_squared, passing, "Hedonic model rejected: {}", model.reasons.join("; "));
            ModelVerdict::Rejected(model)
        };
        metrics::hedonic::model_decided(verdict.stage().as_str(), verdict.model().observations(), adj_r_squared);
        verdict
    }
}

/// A model that went through `decide`
#[derive(Debug, Clone)]
pub struct TrainedModel {
    fitted: FittedModel,
    report: DiagnosticReport,
    reasons: Vec<String>,
}

impl TrainedModel {
    pub fn fit(&self) -> &OlsFit {
        &self.fitted.fit
    }

    pub fn report(&self) -> &DiagnosticReport {
        &self.report
    }

    /// Why the model was rejected; empty when accepted
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn observations(&self) -> usize {
        self.fitted.fit.n
    }

    pub fn dropped_incomplete(&self) -> usize {
        self.fitted.dropped_incomplete
    }

    pub fn predict(&self, covariates: &Covariates) -> f64 {
        self.fitted.predict(covariates)
    }
}

#[derive(Debug, Clone)]
pub enum ModelVerdict {
    Accepted(TrainedModel),
    Rejected(TrainedModel),
}

impl ModelVerdict {
    pub fn stage(&self) -> ModelStage {
        match self {
            ModelVerdict::Accepted(_) => ModelStage::Accepted,
            ModelVerdict::Rejected(_) => ModelStage::Rejected,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ModelVerdict::Accepted(_))
    }

    pub fn model(&self) -> &TrainedModel {
        match self {
            ModelVerdict::Accepted(model) | ModelVerdict::Rejected(model) => model,
        }
    }
}

/// Runs the full lifecycle with one configuration
#[derive(Debug, Clone, Default)]
pub struct HedonicTrainer {
    config: HedonicConfig,
}

impl HedonicTrainer {
    pub fn new(config: HedonicConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HedonicConfig {
        &self.config
    }

    pub fn train(&self, observations: &[HedonicObservation]) -> Result<ModelVerdict, HedonicError> {
        let fitted = UntrainedModel::new(self.config).fit(observations)?;
        Ok(fitted.diagnose().decide())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use diagnostics::{DiagnosticKind, DiagnosticResult};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn standard_normal(rng: &mut StdRng) -> f64 {
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Log price driven by surface with small, correctly signed effects
    pub(crate) fn synthetic_observations(n: usize, seed: u64) -> Vec<HedonicObservation> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let superficie: f64 = rng.gen_range(40.0..150.0);
                let antiguedad: f64 = rng.gen_range(0.0..100.0);
                let plantas = f64::from(rng.gen_range(1u32..10));
                let ascensor = if rng.gen_bool(0.6) { 1.0 } else { 0.0 };
                let distancia: f64 = rng.gen_range(0.2..8.0);
                let ln_precio = 2.0 * superficie.ln() - 0.004 * antiguedad + 0.08 * ascensor - 0.05 * distancia
                    + 0.05 * standard_normal(&mut rng);
                HedonicObservation {
                    barrio_id: i as BarrioId + 1,
                    anio: 2023,
                    precio: Some(ln_precio.exp()),
                    superficie_m2: Some(superficie),
                    antiguedad_anios: Some(antiguedad),
                    plantas: Some(plantas),
                    ascensor: Some(ascensor),
                    distancia_centro_km: Some(distancia),
                    provenance: "portaldades|catastro".to_string(),
                }
            })
            .collect()
    }

    fn report_with_passing(passing: usize) -> DiagnosticReport {
        DiagnosticReport {
            results: DiagnosticKind::ALL
                .iter()
                .enumerate()
                .map(|(i, test)| DiagnosticResult {
                    test: *test,
                    passed: i < passing,
                    statistic: Some(0.0),
                    p_value: None,
                    detail: String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_well_specified_model_is_accepted() {
        let verdict = HedonicTrainer::default().train(&synthetic_observations(120, 7)).unwrap();
        assert_eq!(verdict.stage(), ModelStage::Accepted);

        let model = verdict.model();
        assert!(model.reasons().is_empty());
        assert!((model.fit().coefficients[1] - 2.0).abs() < 0.1);
        assert!(model.fit().adj_r_squared > 0.9);
        assert_eq!(model.report().results.len(), 5);
    }

    #[test]
    fn test_too_few_observations_is_data_insufficient() {
        let err = HedonicTrainer::default().train(&synthetic_observations(12, 1)).unwrap_err();
        assert_eq!(err, HedonicError::DataInsufficient { available: 12, required: 30 });
    }

    #[test]
    fn test_incomplete_rows_are_dropped_before_counting() {
        let mut observations = synthetic_observations(35, 3);
        for obs in observations.iter_mut().take(10) {
            obs.distancia_centro_km = None;
        }
        observations[10].precio = Some(0.0);
        let err = UntrainedModel::new(HedonicConfig::default()).fit(&observations).unwrap_err();
        assert_eq!(err, HedonicError::DataInsufficient { available: 24, required: 30 });
    }

    #[test]
    fn test_three_of_five_diagnostics_is_rejected_despite_high_r_squared() {
        let fitted = UntrainedModel::new(HedonicConfig::default()).fit(&synthetic_observations(120, 11)).unwrap();
        assert!(fitted.fit().adj_r_squared > 0.9);

        let diagnosed = DiagnosedModel { fitted: fitted.clone(), report: report_with_passing(3) };
        let verdict = diagnosed.decide();
        assert_eq!(verdict.stage(), ModelStage::Rejected);
        assert!(verdict.model().reasons()[0].contains("3 of 5"));

        let diagnosed = DiagnosedModel { fitted, report: report_with_passing(4) };
        assert!(diagnosed.decide().is_accepted());
    }

    #[test]
    fn test_low_adjusted_r_squared_is_rejected() {
        let config = HedonicConfig { min_adj_r_squared: 0.999_9, ..HedonicConfig::default() };
        let verdict = HedonicTrainer::new(config).train(&synthetic_observations(120, 5)).unwrap();
        assert!(!verdict.is_accepted());
        assert!(verdict.model().reasons().iter().any(|r| r.contains("adjusted R²")));
    }

    #[test]
    fn test_predict_follows_surface_elasticity() {
        let verdict = HedonicTrainer::default().train(&synthetic_observations(150, 21)).unwrap();
        let small = Covariates {
            superficie_m2: 50.0,
            antiguedad_anios: 30.0,
            plantas: 4.0,
            ascensor: 1.0,
            distancia_centro_km: 2.0,
        };
        let large = Covariates { superficie_m2: 100.0, ..small };
        let ratio = verdict.model().predict(&large) / verdict.model().predict(&small);
        // Doubling surface with elasticity 2 quadruples the price
        assert!((ratio - 4.0).abs() < 0.4);
    }
}
