use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::diagnostics::DiagnosticReport;
use super::linalg::{dot, mean};
use super::{Covariates, ModelStage, ModelVerdict, TERMS};
use crate::error::Result;
use crate::pipeline::storage::{StarSchemaStore, StoredModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientEstimate {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl ResidualSummary {
    fn from_residuals(residuals: &[f64]) -> Self {
        let mut sorted = residuals.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let median = match n {
            0 => 0.0,
            _ if n % 2 == 1 => sorted[n / 2],
            _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
        };
        let m = mean(residuals);
        let variance = if n > 1 {
            residuals.iter().map(|e| (e - m).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        Self {
            min: sorted.first().copied().unwrap_or(0.0),
            median,
            max: sorted.last().copied().unwrap_or(0.0),
            std_dev: variance.sqrt(),
        }
    }
}

/// Serialized outcome of one training run, accepted or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedonicModelArtifact {
    pub model_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub verdict: ModelStage,
    pub reasons: Vec<String>,
    pub n_observations: usize,
    pub dropped_incomplete: usize,
    pub coefficients: Vec<CoefficientEstimate>,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub diagnostics: DiagnosticReport,
    pub residuals: ResidualSummary,
}

impl HedonicModelArtifact {
    pub fn from_verdict(verdict: &ModelVerdict) -> Self {
        let model = verdict.model();
        let fit = model.fit();
        let coefficients = TERMS
            .iter()
            .enumerate()
            .map(|(j, (term, _))| CoefficientEstimate {
                term: term.to_string(),
                estimate: fit.coefficients[j],
                std_error: fit.std_errors[j],
                t_value: fit.t_values[j],
            })
            .collect();

        Self {
            model_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            verdict: verdict.stage(),
            reasons: model.reasons().to_vec(),
            n_observations: model.observations(),
            dropped_incomplete: model.dropped_incomplete(),
            coefficients,
            r_squared: fit.r_squared,
            adj_r_squared: fit.adj_r_squared,
            diagnostics: model.report().clone(),
            residuals: ResidualSummary::from_residuals(&fit.residuals),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict == ModelStage::Accepted
    }

    pub fn predict(&self, covariates: &Covariates) -> f64 {
        let beta: Vec<f64> = self.coefficients.iter().map(|c| c.estimate).collect();
        dot(&beta, &covariates.design_row()).exp()
    }

    pub fn file_name(&self) -> String {
        format!("hedonic_{}.json", self.model_id)
    }

    pub fn diagnostics_file_name(&self) -> String {
        format!("hedonic_{}_diagnostics.json", self.model_id)
    }

    /// Plain-text diagnostic report written next to the JSON artifact
    pub fn render_report(&self) -> String {
        let mut out = format!(
            "Hedonic model {}\ntrained at {}\nverdict: {}\nobservations: {} ({} dropped as incomplete)\nR²: {:.4}  adjusted R²: {:.4}\n\n",
            self.model_id,
            self.trained_at.to_rfc3339(),
            self.verdict,
            self.n_observations,
            self.dropped_incomplete,
            self.r_squared,
            self.adj_r_squared
        );
        out.push_str("term                   estimate    std.err    t\n");
        for c in &self.coefficients {
            out.push_str(&format!("{:<20} {:>10.4} {:>10.4} {:>7.2}\n", c.term, c.estimate, c.std_error, c.t_value));
        }
        out.push_str("\ndiagnostics\n");
        for r in &self.diagnostics.results {
            out.push_str(&format!(
                "  [{}] {:<20} {}\n",
                if r.passed { "pass" } else { "FAIL" },
                r.test.as_str(),
                r.detail
            ));
        }
        for reason in &self.reasons {
            out.push_str(&format!("rejected: {}\n", reason));
        }
        out
    }
}

/// Write `contents` to a temporary sibling and rename it into place
fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write the JSON artifact, the diagnostic report document and a text
/// rendering under `model_dir`
pub fn write_artifact(model_dir: &Path, artifact: &HedonicModelArtifact) -> Result<PathBuf> {
    fs::create_dir_all(model_dir)?;
    let path = model_dir.join(artifact.file_name());
    write_atomically(&path, &serde_json::to_vec_pretty(artifact)?)?;
    write_atomically(
        &model_dir.join(artifact.diagnostics_file_name()),
        &serde_json::to_vec_pretty(&artifact.diagnostics)?,
    )?;
    write_atomically(&path.with_extension("txt"), artifact.render_report().as_bytes())?;
    info!("Wrote {} model artifact to {}", artifact.verdict, path.display());
    Ok(path)
}

pub fn read_artifact(path: &Path) -> Result<HedonicModelArtifact> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write the artifact and register it in `hedonic_models`
pub fn persist(store: &StarSchemaStore, model_dir: &Path, artifact: &HedonicModelArtifact) -> Result<PathBuf> {
    let path = write_artifact(model_dir, artifact)?;
    store.record_model(&StoredModel {
        model_id: artifact.model_id.to_string(),
        trained_at: artifact.trained_at,
        verdict: artifact.verdict.as_str().to_string(),
        n_observations: artifact.n_observations,
        adj_r_squared: artifact.adj_r_squared,
        passing_diagnostics: artifact.diagnostics.passing_count(),
        artifact_path: path.clone(),
    })?;
    Ok(path)
}

/// The most recent accepted artifact, if any is registered and readable
pub fn latest_accepted(store: &StarSchemaStore) -> Result<Option<HedonicModelArtifact>> {
    let Some(stored) = store.latest_accepted_model()? else {
        return Ok(None);
    };
    match read_artifact(&stored.artifact_path) {
        Ok(artifact) => Ok(Some(artifact)),
        Err(e) => {
            warn!(
                "Accepted model {} is registered but its artifact {} is unreadable: {}",
                stored.model_id,
                stored.artifact_path.display(),
                e
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hedonic::tests::synthetic_observations;
    use crate::hedonic::{HedonicConfig, HedonicTrainer};
    use tempfile::tempdir;

    #[test]
    fn test_persist_and_read_back_latest_accepted() {
        let dir = tempdir().unwrap();
        let store = StarSchemaStore::open_in_memory().unwrap();
        assert!(latest_accepted(&store).unwrap().is_none());

        let verdict = HedonicTrainer::default().train(&synthetic_observations(120, 7)).unwrap();
        assert!(verdict.is_accepted());
        let accepted = HedonicModelArtifact::from_verdict(&verdict);
        let path = persist(&store, dir.path(), &accepted).unwrap();
        assert!(path.exists());
        assert!(path.with_extension("txt").exists());
        let report: DiagnosticReport =
            serde_json::from_str(&fs::read_to_string(dir.path().join(accepted.diagnostics_file_name())).unwrap())
                .unwrap();
        assert_eq!(report.results.len(), 5);

        // A later rejection does not displace the accepted model
        let strict = HedonicConfig { min_adj_r_squared: 0.999_99, ..HedonicConfig::default() };
        let rejected = HedonicTrainer::new(strict).train(&synthetic_observations(120, 8)).unwrap();
        assert!(!rejected.is_accepted());
        persist(&store, dir.path(), &HedonicModelArtifact::from_verdict(&rejected)).unwrap();

        let latest = latest_accepted(&store).unwrap().unwrap();
        assert_eq!(latest.model_id, accepted.model_id);
        assert_eq!(latest.coefficients.len(), accepted.coefficients.len());
        for (read, written) in latest.coefficients.iter().zip(&accepted.coefficients) {
            assert_eq!(read.term, written.term);
            assert!((read.estimate - written.estimate).abs() < 1e-12);
        }
    }

    #[test]
    fn test_artifact_prediction_matches_model() {
        let verdict = HedonicTrainer::default().train(&synthetic_observations(120, 9)).unwrap();
        let artifact = HedonicModelArtifact::from_verdict(&verdict);
        let covariates = Covariates {
            superficie_m2: 75.0,
            antiguedad_anios: 40.0,
            plantas: 5.0,
            ascensor: 1.0,
            distancia_centro_km: 3.0,
        };
        let expected = verdict.model().predict(&covariates);
        assert!((artifact.predict(&covariates) - expected).abs() < 1e-9 * expected);
        assert!(artifact.render_report().contains("ln_superficie"));
    }

    #[test]
    fn test_residual_summary() {
        let summary = ResidualSummary::from_residuals(&[-1.0, 0.0, 2.0, 3.0]);
        assert_eq!(summary.min, -1.0);
        assert_eq!(summary.max, 3.0);
        assert_eq!(summary.median, 1.0);
    }
}
