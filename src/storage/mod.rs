//! On-disk state: JSON caches, raw HTML snapshots and metrics files.

pub mod metrics;
pub mod snapshot;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{ArchivedDay, Audience, EntryCache, GroupLesson, LessonSlot, TeacherLesson, TeamCache};

pub use metrics::{MetricsWriter, ParseMetrics};
pub use snapshot::{SnapshotKind, SnapshotStore};

const TEAM_FILE: &str = "team";

// ── Cache state ───────────────────────────────────────────────────────────────

/// Everything the poll loop keeps between cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Caches {
    pub groups: EntryCache<GroupLesson>,
    pub teachers: EntryCache<TeacherLesson>,
    pub team: TeamCache,
    pub success_update: bool,
}

impl Caches {
    /// Latest successful update, or `None` until both families have one.
    pub fn last_success_update(&self) -> Option<DateTime<Utc>> {
        let groups = self.groups.last_update?;
        let teachers = self.teachers.last_update?;
        Some(groups.max(teachers))
    }

    /// Every cached day, tagged by family.
    pub fn archive_all(&self) -> Vec<ArchivedDay> {
        let groups = self.groups.entities.values().flat_map(|entity| {
            entity
                .days
                .iter()
                .map(|day| GroupLesson::archived(&entity.key, day.clone()))
        });
        let teachers = self.teachers.entities.values().flat_map(|entity| {
            entity
                .days
                .iter()
                .map(|day| TeacherLesson::archived(&entity.key, day.clone()))
        });
        groups.chain(teachers).collect()
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// One JSON document per family under `dir`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.json"))
    }

    /// Missing files give defaults; unreadable JSON is logged and removed.
    fn load_json<T: DeserializeOwned + Default>(&self, stem: &str) -> Result<T> {
        let path = self.path(stem);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache file");
                return Ok(T::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read cache {:?}", path)),
        };

        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache file, discarding");
                std::fs::remove_file(&path).ok();
                Ok(T::default())
            }
        }
    }

    fn save_json<T: Serialize>(&self, stem: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Could not create dir {:?}", self.dir))?;

        let path = self.path(stem);
        let json = serde_json::to_vec_pretty(value).context("Failed to serialize cache")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write cache {:?}", path))
    }

    pub fn load_entries<L: LessonSlot>(&self) -> Result<EntryCache<L>> {
        self.load_json(L::AUDIENCE.file_stem())
    }

    pub fn save_entries<L: LessonSlot>(&self, cache: &EntryCache<L>) -> Result<()> {
        self.save_json(L::AUDIENCE.file_stem(), cache)
    }

    pub fn load_team(&self) -> Result<TeamCache> {
        self.load_json(TEAM_FILE)
    }

    pub fn save_team(&self, team: &TeamCache) -> Result<()> {
        self.save_json(TEAM_FILE, team)
    }

    pub fn load_all(&self) -> Result<Caches> {
        let caches = Caches {
            groups: self.load_entries()?,
            teachers: self.load_entries()?,
            team: self.load_team()?,
            success_update: false,
        };
        info!(
            groups = caches.groups.entities.len(),
            teachers = caches.teachers.entities.len(),
            team = caches.team.names.len(),
            "cache loaded"
        );
        Ok(caches)
    }

    pub fn save_all(&self, caches: &Caches) -> Result<()> {
        self.save_entries(&caches.groups)?;
        self.save_entries(&caches.teachers)?;
        self.save_team(&caches.team)
    }

    /// Path of a family's cache file, for local-mode reads.
    pub fn entries_path(&self, audience: Audience) -> PathBuf {
        self.path(audience.file_stem())
    }

    pub fn team_path(&self) -> PathBuf {
        self.path(TEAM_FILE)
    }
}

#[cfg(test)]
pub(crate) fn temp_dir(name: &str) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("timetable-watch-{name}-{}-{n}", std::process::id()))
}
