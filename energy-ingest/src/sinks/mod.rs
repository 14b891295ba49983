//! Run artifacts on local disk: merged CSV, quality report, raw source dumps.

pub mod artifact_store;

pub use artifact_store::{ArtifactStore, ROLLING_FILE};

use std::path::PathBuf;

use time::{format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

const RUN_ID_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

/// Compact UTC timestamp used in artifact names, e.g. `20240115T060000Z`.
pub fn run_id(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC).format(RUN_ID_FORMAT).unwrap_or_default()
}

pub fn parse_run_id(text: &str) -> Option<PrimitiveDateTime> {
    PrimitiveDateTime::parse(text, RUN_ID_FORMAT).ok()
}
