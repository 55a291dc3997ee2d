use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::error::TimetableError;
use crate::models::Audience;

/// Summary of the last accepted parse of one family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseMetrics {
    pub audience: Audience,
    pub parser: String,
    pub hash: String,
    pub fallback_used: bool,
    pub entities: usize,
    pub lessons: usize,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

pub struct MetricsWriter {
    dir: PathBuf,
}

impl MetricsWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Overwrite `{dir}/{family}.json`.
    pub fn write(&self, metrics: &ParseMetrics) -> Result<PathBuf, TimetableError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", metrics.audience.file_stem()));
        std::fs::write(&path, serde_json::to_vec_pretty(metrics)?)?;
        Ok(path)
    }
}
