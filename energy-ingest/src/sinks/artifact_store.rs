use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use energy_domain::MergedRecord;
use serde::Serialize;
use time::Date;

use super::{parse_run_id, SinkError};
use crate::validate::QualityReport;

pub const ROLLING_FILE: &str = "merged_rolling.csv";
pub const MERGED_PREFIX: &str = "merged_data";
pub const REPORT_PREFIX: &str = "quality_report";

/// Writes run artifacts under one directory, named `<prefix>_<run_id>.<ext>`.
///
/// Every file is written to a sibling `.tmp` path and renamed into place, so a
/// reader never observes a half-written artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), SinkError> {
        fs::create_dir_all(&self.root).map_err(|e| SinkError::io(&self.root, e))
    }

    fn path_for(&self, prefix: &str, run_id: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{prefix}_{run_id}.{ext}"))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
        self.ensure_root()?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| SinkError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| SinkError::io(path, e))?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "wrote artifact");
        Ok(())
    }

    pub fn write_merged(&self, run_id: &str, rows: &[MergedRecord]) -> Result<PathBuf, SinkError> {
        let path = self.path_for(MERGED_PREFIX, run_id, "csv");
        self.write_atomic(&path, &encode_csv(rows)?)?;
        Ok(path)
    }

    pub fn write_report(&self, run_id: &str, report: &QualityReport) -> Result<PathBuf, SinkError> {
        let path = self.path_for(REPORT_PREFIX, run_id, "json");
        self.write_atomic(&path, &serde_json::to_vec_pretty(report)?)?;
        Ok(path)
    }

    /// Dumps a source's records as fetched, before any cleanup.
    pub fn write_raw<T: Serialize>(&self, source: &str, run_id: &str, records: &[T]) -> Result<PathBuf, SinkError> {
        let path = self.path_for(&format!("{source}_raw"), run_id, "json");
        self.write_atomic(&path, &serde_json::to_vec_pretty(records)?)?;
        Ok(path)
    }

    pub fn read_merged(path: &Path) -> Result<Vec<MergedRecord>, SinkError> {
        let file = fs::File::open(path).map_err(|e| SinkError::io(path, e))?;
        let mut rdr = csv::Reader::from_reader(file);
        let mut rows = Vec::new();
        for row in rdr.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Folds `rows` into the rolling dataset keyed by (city, date); incoming
    /// rows replace stored ones. Returns the row count after the upsert.
    pub fn upsert_rolling(&self, rows: &[MergedRecord]) -> Result<usize, SinkError> {
        let path = self.root.join(ROLLING_FILE);
        let mut by_key: BTreeMap<(String, Date), MergedRecord> = BTreeMap::new();

        if path.exists() {
            for row in Self::read_merged(&path)? {
                by_key.insert((row.city.clone(), row.date), row);
            }
        }
        let existing = by_key.len();
        for row in rows {
            by_key.insert((row.city.clone(), row.date), row.clone());
        }

        let merged: Vec<MergedRecord> = by_key.into_values().collect();
        self.write_atomic(&path, &encode_csv(&merged)?)?;
        tracing::info!(existing, incoming = rows.len(), total = merged.len(), "updated rolling dataset");
        Ok(merged.len())
    }

    /// Most recent `<prefix>_<run_id>.*` by the timestamp in its name.
    pub fn latest(&self, prefix: &str) -> Result<Option<PathBuf>, SinkError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::io(&self.root, e)),
        };

        let mut best = None;
        for entry in entries {
            let entry = entry.map_err(|e| SinkError::io(&self.root, e))?;
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            let Some(stamp) = stem
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('_'))
                .and_then(parse_run_id)
            else {
                continue;
            };
            if best.as_ref().map_or(true, |(t, _)| stamp > *t) {
                best = Some((stamp, path));
            }
        }
        Ok(best.map(|(_, path)| path))
    }
}

fn encode_csv(rows: &[MergedRecord]) -> Result<Vec<u8>, SinkError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    if rows.is_empty() {
        wtr.write_record(MERGED_COLUMNS)?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.into_inner().map_err(|e| SinkError::Csv(e.into_error().into()))
}

pub const MERGED_COLUMNS: [&str; 10] = [
    "city",
    "date",
    "temp_high_c",
    "temp_low_c",
    "temp_avg_c",
    "energy_consumption_mwh",
    "energy_region",
    "station_id",
    "latitude",
    "longitude",
];
