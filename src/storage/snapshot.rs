//! Raw HTML snapshots of fetched pages, with line diffs between them.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use similar::{ChangeTag, TextDiff};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::RawHtmlConfig;
use crate::error::TimetableError;
use crate::models::Audience;

const BUCKET_FORMAT: &str = "%Y-%m-%d";
/// Length of a `BUCKET_FORMAT` date.
const BUCKET_FORMAT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// The page was accepted.
    Good,
    /// Parsing, validation or quarantine rejected the page.
    Bad,
}

impl SnapshotKind {
    pub fn name(self) -> &'static str {
        match self {
            SnapshotKind::Good => "good",
            SnapshotKind::Bad => "bad",
        }
    }
}

/// Added/removed lines between two pages, at most `max_lines` per side.
pub fn line_diff(old: &str, new: &str, max_lines: usize) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let (mut added_total, mut removed_total) = (0usize, 0usize);

    for change in diff.iter_all_changes() {
        let line = change.value().trim_end_matches(['\r', '\n']);
        match change.tag() {
            ChangeTag::Insert => {
                added_total += 1;
                if added.len() < max_lines {
                    added.push(format!("+ {line}"));
                }
            }
            ChangeTag::Delete => {
                removed_total += 1;
                if removed.len() < max_lines {
                    removed.push(format!("- {line}"));
                }
            }
            ChangeTag::Equal => {}
        }
    }

    let mut out = format!("removed: {removed_total}, added: {added_total}\n");
    for line in removed.iter().chain(&added) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

pub struct SnapshotStore {
    dir: PathBuf,
    max_days: u32,
    diff_max_lines: usize,
    store_daily: bool,
}

impl SnapshotStore {
    pub fn new(config: &RawHtmlConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_days: config.max_days,
            diff_max_lines: config.diff_max_lines,
            store_daily: config.store_daily,
        }
    }

    fn bucket(&self, now: NaiveDateTime) -> PathBuf {
        if self.store_daily {
            self.dir.join(now.format(BUCKET_FORMAT).to_string())
        } else {
            self.dir.clone()
        }
    }

    fn last_path(&self, audience: Audience, kind: SnapshotKind) -> PathBuf {
        self.dir.join(format!("{}-last-{}.html", audience.file_stem(), kind.name()))
    }

    /// Store `html` as the latest snapshot of `kind`. Returns the diff file
    /// written when it differs from the previous snapshot of that kind.
    pub fn record(
        &self,
        audience: Audience,
        kind: SnapshotKind,
        html: &str,
        now: NaiveDateTime,
    ) -> Result<Option<PathBuf>, TimetableError> {
        let bucket = self.bucket(now);
        std::fs::create_dir_all(&bucket)?;

        let stem = format!("{}-{}-{}", audience.file_stem(), kind.name(), now.format("%H%M%S"));
        // Flat diff files lead with their date.
        let stem = if self.store_daily {
            stem
        } else {
            format!("{}_{stem}", now.format(BUCKET_FORMAT))
        };
        let last = self.last_path(audience, kind);
        let previous = std::fs::read_to_string(&last).ok();

        let mut diff_path = None;
        if let Some(previous) = previous.filter(|previous| previous != html) {
            let path = bucket.join(format!("{stem}.diff"));
            std::fs::write(&path, line_diff(&previous, html, self.diff_max_lines))?;
            info!(path = %path.display(), "snapshot changed");
            diff_path = Some(path);
        }

        std::fs::write(&last, html)?;
        if self.store_daily {
            std::fs::write(bucket.join(format!("{stem}.html")), html)?;
        }
        self.prune(now.date())?;

        Ok(diff_path)
    }

    /// Remove daily buckets and flat diff files older than the retention
    /// window.
    pub fn prune(&self, today: NaiveDate) -> Result<usize, TimetableError> {
        let oldest = today - Duration::days(i64::from(self.max_days));
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(date) = name
                .get(..BUCKET_FORMAT_LEN)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, BUCKET_FORMAT).ok())
            else {
                continue;
            };
            if date >= oldest {
                continue;
            }

            let file_type = entry.file_type()?;
            if file_type.is_dir() && name.len() == BUCKET_FORMAT_LEN {
                std::fs::remove_dir_all(entry.path())?;
                debug!(bucket = %date, "pruned snapshot bucket");
                removed += 1;
            } else if file_type.is_file() && name.ends_with(".diff") {
                std::fs::remove_file(entry.path())?;
                debug!(file = name, "pruned snapshot diff");
                removed += 1;
            }
        }

        Ok(removed)
    }
}
