//! Source name constants shared by the manifest, the criticality policy and
//! the normalization registry.

// Core demographic, price and building sources
pub const INE: &str = "ine";
pub const PORTALDADES: &str = "portaldades";
pub const CATASTRO: &str = "catastro";

// Enrichment sources
pub const IDEALISTA: &str = "idealista";
pub const TURISMO: &str = "turismo";
pub const MEDIO_AMBIENTE: &str = "medio_ambiente";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DEFAULT_TAG_SEPARATOR: &str = "|";

/// Plaça de Catalunya, the reference center for distance covariates
pub const REFERENCE_CENTER_LAT: f64 = 41.3870;
pub const REFERENCE_CENTER_LON: f64 = 2.1700;

/// Sources whose absence invalidates a run unless configured otherwise
pub fn default_critical_sources() -> Vec<&'static str> {
    vec![INE, PORTALDADES, CATASTRO]
}

/// Sources whose absence only degrades completeness
pub fn default_optional_sources() -> Vec<&'static str> {
    vec![IDEALISTA, TURISMO, MEDIO_AMBIENTE]
}

/// Every source with a built-in normalizer
pub fn get_supported_sources() -> Vec<&'static str> {
    let mut sources = default_critical_sources();
    sources.extend(default_optional_sources());
    sources
}
