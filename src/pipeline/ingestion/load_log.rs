use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::ingestion::criticality::Criticality;

/// One source load attempt, as appended to the NDJSON load log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadAttempt {
    pub run_id: String,
    pub source_name: String,
    pub dataset_id: String,
    pub file_path: PathBuf,
    /// 1-based attempt number for this source within the run
    pub attempt: u32,
    pub criticality: Criticality,
    pub rows: Option<usize>,
    pub checksum: Option<String>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl LoadAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Append-only NDJSON log of load attempts
#[derive(Debug, Clone)]
pub struct LoadLog {
    path: PathBuf,
}

impl LoadLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, attempt: &LoadAttempt) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(attempt)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Append, logging instead of failing; the load log never aborts a run
    pub fn record(&self, attempt: &LoadAttempt) {
        if let Err(e) = self.append(attempt) {
            warn!("Failed to append load attempt to {}: {}", self.path.display(), e);
        }
    }

    /// Every parseable attempt in file order. Unparseable lines are skipped.
    pub fn read_all(&self) -> anyhow::Result<Vec<LoadAttempt>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut attempts = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LoadAttempt>(&line) {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => warn!("Skipping load log line {}: {}", line_no + 1, e),
            }
        }
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn attempt(source: &str, error: Option<&str>) -> LoadAttempt {
        LoadAttempt {
            run_id: "run-1".to_string(),
            source_name: source.to_string(),
            dataset_id: format!("{}-2021", source),
            file_path: PathBuf::from(format!("{}.csv", source)),
            attempt: 1,
            criticality: Criticality::Optional,
            rows: error.is_none().then_some(10),
            checksum: None,
            elapsed_ms: 3,
            error: error.map(String::from),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_append_then_read_all() {
        let dir = tempdir().unwrap();
        let log = LoadLog::new(dir.path().join("logs/load_attempts.ndjson"));

        log.append(&attempt("ine", None)).unwrap();
        log.append(&attempt("turismo", Some("extract not found"))).unwrap();

        let attempts = log.read_all().unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].succeeded());
        assert!(!attempts[1].succeeded());
        assert_eq!(attempts[1].source_name, "turismo");
    }

    #[test]
    fn test_missing_log_reads_empty_and_garbage_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("load.ndjson");
        let log = LoadLog::new(&path);
        assert!(log.read_all().unwrap().is_empty());

        fs::write(&path, "not json\n").unwrap();
        log.append(&attempt("ine", None)).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
    }
}
