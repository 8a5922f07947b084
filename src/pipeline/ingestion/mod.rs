// Ingestion: manifest discovery, extract loading and criticality routing

pub mod criticality;
pub mod load_log;
pub mod manifest;
pub mod source_loader;

pub use criticality::{Criticality, CriticalityPolicy, CriticalityRouter, RetryPolicy, SourceOutcome};
pub use manifest::{read_manifest, ManifestEntry, ManifestReport};
pub use source_loader::{CsvExtractLoader, ExtractLoader, RawExtract};
