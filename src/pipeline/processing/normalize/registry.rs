use std::collections::HashMap;

use super::normalizers::{
    CatastroNormalizer, IdealistaNormalizer, IneNormalizer, MedioAmbienteNormalizer, PortalDadesNormalizer,
    SourceNormalizer, TurismoNormalizer,
};
use super::NormalizedBatch;
use crate::error::LoadError;
use crate::pipeline::ingestion::source_loader::RawExtract;

/// Registry for source-specific normalization strategies
pub struct NormalizationRegistry {
    normalizers: HashMap<String, Box<dyn SourceNormalizer>>,
}

impl NormalizationRegistry {
    /// Create a new normalization registry with the built-in normalizers
    pub fn new() -> Self {
        let mut registry = Self { normalizers: HashMap::new() };
        registry.register(Box::new(IneNormalizer::new()));
        registry.register(Box::new(PortalDadesNormalizer::new()));
        registry.register(Box::new(CatastroNormalizer::new()));
        registry.register(Box::new(IdealistaNormalizer::new()));
        registry.register(Box::new(TurismoNormalizer::new()));
        registry.register(Box::new(MedioAmbienteNormalizer::new()));
        registry
    }

    /// Register a normalizer under its own source id, replacing any previous one
    pub fn register(&mut self, normalizer: Box<dyn SourceNormalizer>) {
        self.normalizers.insert(normalizer.source_id().to_string(), normalizer);
    }

    pub fn get_normalizer(&self, source_id: &str) -> Option<&dyn SourceNormalizer> {
        self.normalizers.get(source_id).map(|n| n.as_ref())
    }

    /// Normalize an extract with the normalizer registered for its source
    pub fn normalize(&self, extract: &RawExtract) -> Result<NormalizedBatch, LoadError> {
        let normalizer = self
            .get_normalizer(&extract.source)
            .ok_or_else(|| LoadError::NoNormalizer(extract.source.clone()))?;

        if normalizer.kind() != extract.kind {
            return Err(LoadError::SchemaMismatch(format!(
                "manifest declares {} as {} but {} produces {}",
                extract.dataset_id,
                extract.kind,
                normalizer.name(),
                normalizer.kind()
            )));
        }
        normalizer.normalize(extract)
    }

    /// All registered source ids, sorted
    pub fn list_sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self.normalizers.keys().map(|k| k.as_str()).collect();
        sources.sort_unstable();
        sources
    }
}

impl Default for NormalizationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants;
    use crate::domain::FactKind;
    use crate::pipeline::ingestion::manifest::ManifestEntry;
    use crate::pipeline::ingestion::source_loader::CsvExtractLoader;
    use std::path::PathBuf;

    fn extract(source: &str, kind: FactKind) -> RawExtract {
        let entry = ManifestEntry {
            file_path: PathBuf::from("x.csv"),
            kind,
            source: source.to_string(),
            dataset_id: "x".to_string(),
        };
        CsvExtractLoader::parse_bytes(&entry, b"barrio_id,anio,hogares\n1,2021,10\n").unwrap()
    }

    #[test]
    fn test_registry_has_built_in_normalizers() {
        let registry = NormalizationRegistry::new();
        let mut expected = constants::get_supported_sources();
        expected.sort_unstable();
        assert_eq!(registry.list_sources(), expected);
    }

    #[test]
    fn test_registry_returns_error_for_unknown_source() {
        let registry = NormalizationRegistry::new();
        let result = registry.normalize(&extract("open_data_bcn", FactKind::Demografia));
        assert!(matches!(result, Err(LoadError::NoNormalizer(ref s)) if s == "open_data_bcn"));
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let registry = NormalizationRegistry::new();
        let result = registry.normalize(&extract(constants::INE, FactKind::Precios));
        assert!(matches!(result, Err(LoadError::SchemaMismatch(_))));

        let batch = registry.normalize(&extract(constants::INE, FactKind::Demografia)).unwrap();
        assert_eq!(batch.rows.len(), 1);
    }
}
