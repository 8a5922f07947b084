use std::collections::BTreeSet;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::error::{LoadError, PipelineError, Result};
use crate::metrics;
use crate::pipeline::ingestion::load_log::{LoadAttempt, LoadLog};
use crate::pipeline::ingestion::manifest::ManifestEntry;
use crate::pipeline::processing::normalize::NormalizedBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure aborts the run
    Critical,
    /// Failure degrades completeness only
    Optional,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criticality::Critical => f.write_str("critical"),
            Criticality::Optional => f.write_str("optional"),
        }
    }
}

/// Static classification of source names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalityPolicy {
    critical: BTreeSet<String>,
    optional: BTreeSet<String>,
}

impl CriticalityPolicy {
    pub fn new<C, O>(critical: C, optional: O) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            critical: critical.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }

    /// Sources missing from both lists are treated as optional
    pub fn classify(&self, source: &str) -> Criticality {
        if self.critical.contains(source) {
            Criticality::Critical
        } else {
            if !self.optional.contains(source) {
                debug!("Source '{}' is unclassified; treating as optional", source);
            }
            Criticality::Optional
        }
    }

    pub fn is_critical(&self, source: &str) -> bool {
        self.critical.contains(source)
    }

    pub fn critical_sources(&self) -> impl Iterator<Item = &str> {
        self.critical.iter().map(String::as_str)
    }

    pub fn optional_sources(&self) -> impl Iterator<Item = &str> {
        self.optional.iter().map(String::as_str)
    }
}

impl Default for CriticalityPolicy {
    fn default() -> Self {
        Self::new(constants::default_critical_sources(), constants::default_optional_sources())
    }
}

/// Retries granted to optional sources; critical sources are never retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_optional_retries: u32,
    /// Base delay, multiplied by the attempt number
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_optional_retries: 0, backoff: Duration::ZERO }
    }

    fn attempts_for(&self, criticality: Criticality) -> u32 {
        match criticality {
            Criticality::Critical => 1,
            Criticality::Optional => self.max_optional_retries + 1,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_optional_retries: 2, backoff: Duration::from_millis(250) }
    }
}

/// An optional source that failed every attempt and is absent from this run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSource {
    pub source_name: String,
    pub dataset_id: String,
    pub cause: String,
    pub attempts: u32,
}

#[derive(Debug)]
pub enum SourceOutcome {
    Loaded(NormalizedBatch),
    Absent(SkippedSource),
}

/// Applies the criticality policy to every per-source load.
///
/// Owns the record of attempts for the run; each attempt goes to tracing,
/// to the metrics facade and, when configured, to the NDJSON load log.
pub struct CriticalityRouter {
    policy: CriticalityPolicy,
    retry: RetryPolicy,
    load_log: Option<LoadLog>,
    run_id: String,
    attempts: Vec<LoadAttempt>,
}

impl CriticalityRouter {
    pub fn new(policy: CriticalityPolicy, retry: RetryPolicy) -> Self {
        Self {
            policy,
            retry,
            load_log: None,
            run_id: String::new(),
            attempts: Vec::new(),
        }
    }

    pub fn with_load_log(mut self, load_log: LoadLog) -> Self {
        self.load_log = Some(load_log);
        self
    }

    pub fn policy(&self) -> &CriticalityPolicy {
        &self.policy
    }

    pub fn set_run_id(&mut self, run_id: impl Into<String>) {
        self.run_id = run_id.into();
    }

    /// Fail when a critical source has no entry in a non-empty manifest
    pub fn check_manifest_coverage(&self, entries: &[ManifestEntry]) -> Result<()> {
        for source in self.policy.critical_sources() {
            if !entries.iter().any(|entry| entry.source == source) {
                error!("Critical source '{}' has no manifest entry; aborting run", source);
                return Err(PipelineError::CriticalSourceMissing(source.to_string()));
            }
        }
        Ok(())
    }

    /// Run `load` for one manifest entry under the source's criticality.
    ///
    /// Critical failures become `PipelineError::CriticalSource`. Optional
    /// failures are retried, then reported as `SourceOutcome::Absent`.
    pub fn route<F>(&mut self, entry: &ManifestEntry, mut load: F) -> Result<SourceOutcome>
    where
        F: FnMut() -> std::result::Result<NormalizedBatch, LoadError>,
    {
        let criticality = self.policy.classify(&entry.source);
        let max_attempts = self.retry.attempts_for(criticality);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.backoff * (attempt - 1);
                debug!(source = %entry.source, attempt, "Retrying after {:?}", delay);
                thread::sleep(delay);
            }

            let started = Instant::now();
            let result = load();
            let elapsed = started.elapsed();

            match result {
                Ok(batch) => {
                    info!(
                        source = %entry.source,
                        dataset_id = %entry.dataset_id,
                        attempt,
                        rows = batch.rows.len(),
                        "Loaded {} ({})",
                        entry.source,
                        criticality
                    );
                    metrics::load::attempt_succeeded(&entry.source, batch.rows.len(), elapsed.as_secs_f64());
                    self.record(entry, attempt, criticality, elapsed, Ok(&batch));
                    return Ok(SourceOutcome::Loaded(batch));
                }
                Err(e) => {
                    last_error = e.to_string();
                    metrics::load::attempt_failed(&entry.source, elapsed.as_secs_f64());
                    self.record(entry, attempt, criticality, elapsed, Err(&last_error));

                    if criticality == Criticality::Critical {
                        error!(
                            source = %entry.source,
                            dataset_id = %entry.dataset_id,
                            "Critical source failed, aborting run: {}",
                            last_error
                        );
                        return Err(PipelineError::CriticalSource {
                            source_name: entry.source.clone(),
                            cause: last_error,
                        });
                    }
                    debug!(source = %entry.source, attempt, "Optional source attempt failed: {}", last_error);
                }
            }
        }

        warn!(
            source = %entry.source,
            dataset_id = %entry.dataset_id,
            attempts = max_attempts,
            "Optional source unavailable, continuing without it: {}",
            last_error
        );
        metrics::load::source_skipped(&entry.source);
        Ok(SourceOutcome::Absent(SkippedSource {
            source_name: entry.source.clone(),
            dataset_id: entry.dataset_id.clone(),
            cause: last_error,
            attempts: max_attempts,
        }))
    }

    fn record(
        &mut self,
        entry: &ManifestEntry,
        attempt: u32,
        criticality: Criticality,
        elapsed: Duration,
        result: std::result::Result<&NormalizedBatch, &str>,
    ) {
        let (rows, checksum, error) = match result {
            Ok(batch) => (Some(batch.rows.len()), Some(batch.checksum.clone()), None),
            Err(e) => (None, None, Some(e.to_string())),
        };
        let load_attempt = LoadAttempt {
            run_id: self.run_id.clone(),
            source_name: entry.source.clone(),
            dataset_id: entry.dataset_id.clone(),
            file_path: entry.file_path.clone(),
            attempt,
            criticality,
            rows,
            checksum,
            elapsed_ms: elapsed.as_millis() as u64,
            error,
            at: Utc::now(),
        };
        if let Some(log) = &self.load_log {
            log.record(&load_attempt);
        }
        self.attempts.push(load_attempt);
    }

    /// Attempts recorded so far for one manifest entry
    pub fn attempt_count(&self, entry: &ManifestEntry) -> u32 {
        self.attempts
            .iter()
            .filter(|a| a.source_name == entry.source && a.dataset_id == entry.dataset_id && a.file_path == entry.file_path)
            .count() as u32
    }

    /// Attempts recorded since the last call
    pub fn take_attempts(&mut self) -> Vec<LoadAttempt> {
        std::mem::take(&mut self.attempts)
    }
}
