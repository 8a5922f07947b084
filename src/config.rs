use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::error::{PipelineError, Result};
use crate::hedonic::diagnostics::DiagnosticThresholds;
use crate::hedonic::HedonicConfig;
use crate::pipeline::ingestion::criticality::{CriticalityPolicy, RetryPolicy};

const DEFAULT_CONFIG_PATH: &str = "pipeline.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub paths: PathSettings,
    pub sources: SourceSettings,
    pub tags: TagSettings,
    pub hedonic: HedonicSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub raw_dir: PathBuf,
    pub database: PathBuf,
    pub log_dir: PathBuf,
    pub load_log: PathBuf,
    pub model_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            database: PathBuf::from("data/processed/barrios.db"),
            log_dir: PathBuf::from("logs"),
            load_log: PathBuf::from("logs/load_attempts.ndjson"),
            model_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub critical: Vec<String>,
    pub optional: Vec<String>,
    pub max_optional_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            critical: constants::default_critical_sources().into_iter().map(String::from).collect(),
            optional: constants::default_optional_sources().into_iter().map(String::from).collect(),
            max_optional_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagSettings {
    pub separator: String,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self { separator: constants::DEFAULT_TAG_SEPARATOR.to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HedonicSettings {
    pub min_observations: usize,
    pub min_adj_r_squared: f64,
    pub min_passing_diagnostics: usize,
    pub alpha: f64,
    pub max_vif: f64,
    pub cooks_distance_cutoff: f64,
    pub sign_t_critical: f64,
    pub reference_lat: f64,
    pub reference_lon: f64,
}

impl Default for HedonicSettings {
    fn default() -> Self {
        let config = HedonicConfig::default();
        Self {
            min_observations: config.min_observations,
            min_adj_r_squared: config.min_adj_r_squared,
            min_passing_diagnostics: config.min_passing_diagnostics,
            alpha: config.thresholds.alpha,
            max_vif: config.thresholds.max_vif,
            cooks_distance_cutoff: config.thresholds.cooks_distance_cutoff,
            sign_t_critical: config.thresholds.sign_t_critical,
            reference_lat: constants::REFERENCE_CENTER_LAT,
            reference_lon: constants::REFERENCE_CENTER_LON,
        }
    }
}

impl PipelineSettings {
    /// Load settings from `path`, or from `pipeline.toml` when it exists, or
    /// fall back to defaults. `.env` and `BARRIO_*` variables override paths.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?,
            None => Self::default(),
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let settings: PipelineSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("BARRIO_RAW_DIR") {
            self.paths.raw_dir = PathBuf::from(dir);
        }
        if let Ok(db) = std::env::var("BARRIO_DB_PATH") {
            self.paths.database = PathBuf::from(db);
        }
        if let Ok(dir) = std::env::var("BARRIO_MODEL_DIR") {
            self.paths.model_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tags.separator.is_empty() {
            return Err(PipelineError::Config("tags.separator must not be empty".to_string()));
        }
        if let Some(both) = self.sources.critical.iter().find(|s| self.sources.optional.contains(s)) {
            return Err(PipelineError::Config(format!(
                "source '{}' is listed as both critical and optional",
                both
            )));
        }
        if self.hedonic.min_passing_diagnostics > crate::hedonic::diagnostics::DiagnosticKind::ALL.len() {
            return Err(PipelineError::Config(format!(
                "hedonic.min_passing_diagnostics is {} but only {} diagnostics exist",
                self.hedonic.min_passing_diagnostics,
                crate::hedonic::diagnostics::DiagnosticKind::ALL.len()
            )));
        }
        Ok(())
    }

    pub fn criticality_policy(&self) -> CriticalityPolicy {
        CriticalityPolicy::new(self.sources.critical.iter().cloned(), self.sources.optional.iter().cloned())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_optional_retries: self.sources.max_optional_retries,
            backoff: Duration::from_millis(self.sources.retry_backoff_ms),
        }
    }

    pub fn hedonic_config(&self) -> HedonicConfig {
        let h = &self.hedonic;
        HedonicConfig {
            min_observations: h.min_observations,
            min_adj_r_squared: h.min_adj_r_squared,
            min_passing_diagnostics: h.min_passing_diagnostics,
            thresholds: DiagnosticThresholds {
                alpha: h.alpha,
                max_vif: h.max_vif,
                cooks_distance_cutoff: h.cooks_distance_cutoff,
                sign_t_critical: h.sign_t_critical,
            },
            reference_lat: h.reference_lat,
            reference_lon: h.reference_lon,
        }
    }
}
