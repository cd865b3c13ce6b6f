use crate::feedback::CoverageAccumulator;
use crate::oracle::CrashMap;
use crate::seed::Location;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const DEFAULT_RESULTS_DIR: &str = "_result";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Report JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of one fuzzing run against a sample target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RunSnapshot {
    pub target: String,
    pub covered_locations: Vec<Location>,
    pub crash_signatures: Vec<String>,
    /// Unix seconds.
    pub start_time: f64,
    /// Unix seconds.
    pub end_time: f64,
}

pub fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl RunSnapshot {
    pub fn capture(
        target: impl Into<String>,
        coverage: &CoverageAccumulator,
        crashes: &CrashMap,
        started: SystemTime,
        finished: SystemTime,
    ) -> Self {
        Self {
            target: target.into(),
            covered_locations: coverage.locations().cloned().collect(),
            crash_signatures: crashes.signatures().map(str::to_string).collect(),
            start_time: unix_seconds(started),
            end_time: unix_seconds(finished),
        }
    }

    /// `<dir>/Sample-<n>.json`
    pub fn path_for(dir: &Path, sample: u32) -> PathBuf {
        dir.join(format!("Sample-{sample}.json"))
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn run_time_secs(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

impl fmt::Display for RunSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: covered lines {}, unique crashes {}, run time {:.2}s",
            self.target,
            self.covered_locations.len(),
            self.crash_signatures.len(),
            self.run_time_secs()
        )
    }
}

/// Loads every `Sample-*.json` snapshot in `dir`, ordered by file name.
/// A missing directory holds no snapshots.
pub fn load_snapshots(dir: &Path) -> Result<Vec<(PathBuf, RunSnapshot)>, ReportError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_snapshot = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("Sample-") && name.ends_with(".json"));
        if is_snapshot && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    paths
        .into_iter()
        .map(|path| RunSnapshot::load(&path).map(|snapshot| (path, snapshot)))
        .collect()
}
