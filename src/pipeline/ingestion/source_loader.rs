use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::FactKind;
use crate::error::LoadError;
use crate::pipeline::ingestion::manifest::ManifestEntry;

/// An immutable tabular extract handed over by an external extractor
#[derive(Debug, Clone)]
pub struct RawExtract {
    pub source: String,
    pub dataset_id: String,
    pub kind: FactKind,
    pub path: PathBuf,
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
    /// Records dropped while reading because they did not match the header shape
    pub skipped_rows: usize,
    /// Hex SHA-256 of the extract bytes
    pub checksum: String,
}

impl RawExtract {
    pub fn new(
        entry: &ManifestEntry,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        skipped_rows: usize,
        checksum: String,
    ) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (canonical_header(h), i))
            .collect();
        Self {
            source: entry.source.clone(),
            dataset_id: entry.dataset_id.clone(),
            kind: entry.kind,
            path: entry.file_path.clone(),
            headers,
            index,
            rows,
            skipped_rows,
            checksum,
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column matching any alias, compared case-insensitively
    pub fn column_index(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| self.index.get(&canonical_header(alias)).copied())
    }

    pub fn has_column(&self, aliases: &[&str]) -> bool {
        self.column_index(aliases).is_some()
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().enumerate().map(move |(line, cells)| RowView { extract: self, line, cells })
    }
}

/// Borrowed view over one extract row with alias-based cell lookup
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    extract: &'a RawExtract,
    /// Zero-based data row number (header excluded)
    pub line: usize,
    cells: &'a [String],
}

impl<'a> RowView<'a> {
    /// Trimmed, non-empty cell of the first matching column
    pub fn get(&self, aliases: &[&str]) -> Option<&'a str> {
        let idx = self.extract.column_index(aliases)?;
        self.cells
            .get(idx)
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
    }
}

/// Reads a manifest entry into a `RawExtract`
pub trait ExtractLoader {
    fn load(&self, entry: &ManifestEntry) -> Result<RawExtract, LoadError>;
}

/// Loader for delimited text extracts (comma, semicolon or tab separated)
#[derive(Debug, Clone, Default)]
pub struct CsvExtractLoader;

impl CsvExtractLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_bytes(entry: &ManifestEntry, bytes: &[u8]) -> Result<RawExtract, LoadError> {
        let checksum = hex::encode(Sha256::digest(bytes));
        let delimiter = detect_delimiter(bytes);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(LoadError::SchemaMismatch(format!(
                "{} has no header row",
                entry.file_path.display()
            )));
        }

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    debug!(source = %entry.source, line, "Skipping unreadable record: {}", e);
                    skipped += 1;
                    continue;
                }
            };
            if record.iter().all(|cell| cell.is_empty()) {
                continue;
            }
            if record.len() != headers.len() {
                debug!(
                    source = %entry.source,
                    line,
                    "Skipping record with {} fields, header has {}",
                    record.len(),
                    headers.len()
                );
                skipped += 1;
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        if skipped > 0 {
            warn!(
                "Skipped {} malformed records in {} ({})",
                skipped,
                entry.file_path.display(),
                entry.source
            );
        }
        if rows.is_empty() {
            return Err(LoadError::Empty);
        }

        Ok(RawExtract::new(entry, headers, rows, skipped, checksum))
    }
}

impl ExtractLoader for CsvExtractLoader {
    fn load(&self, entry: &ManifestEntry) -> Result<RawExtract, LoadError> {
        let bytes = fs::read(&entry.file_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LoadError::NotFound(entry.file_path.clone()),
            _ => LoadError::Io(e),
        })?;
        Self::parse_bytes(entry, &bytes)
    }
}

/// Pick the delimiter that occurs most often in the header line
fn detect_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| first_line.iter().filter(|b| *b == d).count())
        .filter(|d| first_line.contains(d))
        .unwrap_or(b',')
}

fn canonical_header(header: &str) -> String {
    header.trim().to_lowercase().replace([' ', '-'], "_")
}
