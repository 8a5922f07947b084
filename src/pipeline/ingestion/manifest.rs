use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_TAG_SEPARATOR, MANIFEST_FILE};
use crate::domain::FactKind;
use crate::pipeline::processing::tags::normalize_tags;

const REQUIRED_FIELDS: [&str; 2] = ["file_path", "type"];

/// One raw extract declared by the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Resolved against the raw-data directory when relative
    pub file_path: PathBuf,
    #[serde(rename = "type")]
    pub kind: FactKind,
    pub source: String,
    pub dataset_id: String,
}

/// A manifest record that was excluded, with the reason it was excluded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestIssue {
    pub index: usize,
    pub reason: String,
}

/// Result of reading the manifest: valid entries in declaration order plus
/// every record that was skipped
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManifestReport {
    pub path: Option<PathBuf>,
    pub entries: Vec<ManifestEntry>,
    pub skipped: Vec<ManifestIssue>,
}

impl ManifestReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Discover the raw extracts available under `raw_dir`.
///
/// Never fails: a missing manifest means there is nothing to do, and a
/// malformed one is logged and treated as empty.
pub fn read_manifest(raw_dir: &Path) -> ManifestReport {
    let path = raw_dir.join(MANIFEST_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No manifest at {}; nothing to load", path.display());
            return ManifestReport::default();
        }
        Err(e) => {
            error!("Failed to read manifest {}: {}", path.display(), e);
            return ManifestReport { path: Some(path), ..Default::default() };
        }
    };

    let mut report = parse_manifest(&content, raw_dir);
    report.path = Some(path);
    report
}

/// Validate manifest content. Relative file paths resolve against `raw_dir`.
pub fn parse_manifest(content: &str, raw_dir: &Path) -> ManifestReport {
    let parsed: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(e) => {
            error!("Manifest is not valid JSON: {}", e);
            return ManifestReport::default();
        }
    };

    let records = match parsed {
        Value::Array(records) => records,
        other => {
            error!(
                "Manifest top level must be a list of entries, found {}; treating as empty",
                json_type_name(&other)
            );
            return ManifestReport::default();
        }
    };

    let mut report = ManifestReport::default();
    for (index, record) in records.iter().enumerate() {
        match validate_entry(record, raw_dir) {
            Ok(entry) => {
                debug!(index, source = %entry.source, "Manifest entry accepted");
                report.entries.push(entry);
            }
            Err(reason) => {
                warn!("Skipping manifest entry {}: {}", index, reason);
                report.skipped.push(ManifestIssue { index, reason });
            }
        }
    }

    info!(
        "Manifest lists {} valid entries ({} skipped)",
        report.entries.len(),
        report.skipped.len()
    );
    report
}

fn validate_entry(record: &Value, raw_dir: &Path) -> Result<ManifestEntry, String> {
    let map = record
        .as_object()
        .ok_or_else(|| format!("expected a mapping, found {}", json_type_name(record)))?;

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| text_field(map.get(*field)).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing required field(s): {}", missing.join(", ")));
    }

    // Both present after the check above
    let file_path = text_field(map.get("file_path")).unwrap_or_default();
    let type_name = text_field(map.get("type")).unwrap_or_default();

    let kind = FactKind::parse(&type_name).ok_or_else(|| format!("unknown extract type '{}'", type_name))?;

    let file_path = PathBuf::from(file_path);
    let file_path = if file_path.is_absolute() { file_path } else { raw_dir.join(file_path) };

    let source = tag_field(map.get("source")).unwrap_or_else(|| kind.as_str().to_string());
    let dataset_id = tag_field(map.get("dataset_id")).unwrap_or_else(|| {
        file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.clone())
    });

    Ok(ManifestEntry { file_path, kind, source, dataset_id })
}

/// Provenance field with duplicate tags removed
fn tag_field(value: Option<&Value>) -> Option<String> {
    text_field(value)
        .map(|raw| normalize_tags(&raw, DEFAULT_TAG_SEPARATOR))
        .filter(|tags| !tags.is_empty())
}

/// Non-empty string (or number) value of a field
fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
