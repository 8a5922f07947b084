// Base trait and the key-column layout shared by every source
pub mod base;

// Per-source normalizers
pub mod catastro;
pub mod idealista;
pub mod ine;
pub mod medio_ambiente;
pub mod portaldades;
pub mod turismo;

pub use base::{ExtractLayout, SourceNormalizer};
pub use catastro::CatastroNormalizer;
pub use idealista::IdealistaNormalizer;
pub use ine::IneNormalizer;
pub use medio_ambiente::MedioAmbienteNormalizer;
pub use portaldades::PortalDadesNormalizer;
pub use turismo::TurismoNormalizer;
