use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::calendar::{DayIndex, StringDate, WeekIndex};
use crate::error::TimetableError;

// ── Audience ──────────────────────────────────────────────────────────────────

/// Which timetable family a page, cache or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Student,
    Teacher,
}

impl Audience {
    pub fn name(self) -> &'static str {
        match self {
            Audience::Student => "student",
            Audience::Teacher => "teacher",
        }
    }

    /// Base name of the cache / snapshot files of this family.
    pub fn file_stem(self) -> &'static str {
        match self {
            Audience::Student => "groups",
            Audience::Teacher => "teachers",
        }
    }
}

// ── Lesson entries ────────────────────────────────────────────────────────────

/// One lesson of a group (or of one of its subgroups).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgroup: Option<u32>,
    pub subject: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub teacher: Option<String>,
    #[serde(default)]
    pub cabinet: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl GroupEntry {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subgroup: None,
            subject: subject.into(),
            kind: None,
            teacher: None,
            cabinet: None,
            comment: None,
        }
    }
}

/// A group's lesson slot: a single entry or parallel subgroup entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupLesson {
    Single(GroupEntry),
    Parallel(Vec<GroupEntry>),
}

impl GroupLesson {
    pub fn entries(&self) -> &[GroupEntry] {
        match self {
            GroupLesson::Single(entry) => std::slice::from_ref(entry),
            GroupLesson::Parallel(entries) => entries,
        }
    }

    pub fn entries_mut(&mut self) -> &mut [GroupEntry] {
        match self {
            GroupLesson::Single(entry) => std::slice::from_mut(entry),
            GroupLesson::Parallel(entries) => entries,
        }
    }
}

/// One lesson a teacher gives; a teacher slot holds at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherLesson {
    pub subject: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgroup: Option<u32>,
    pub group: String,
    #[serde(default)]
    pub cabinet: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Comparable view of one entry, shared by both lesson families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFacets<'a> {
    pub kind: Option<&'a str>,
    pub subject: &'a str,
    /// Teacher for group lessons, group for teacher lessons.
    pub counterpart: Option<&'a str>,
    pub subgroup: Option<u32>,
    pub comment: Option<&'a str>,
}

/// Behaviour the day engine needs from a lesson slot type.
pub trait LessonSlot:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const AUDIENCE: Audience;

    fn facets(&self) -> Vec<EntryFacets<'_>>;

    fn set_comment(&mut self, comment: &str);

    fn archived(key: &str, day: Day<Self>) -> ArchivedDay;
}

impl LessonSlot for GroupLesson {
    const AUDIENCE: Audience = Audience::Student;

    fn facets(&self) -> Vec<EntryFacets<'_>> {
        self.entries()
            .iter()
            .map(|e| EntryFacets {
                kind: e.kind.as_deref(),
                subject: &e.subject,
                counterpart: e.teacher.as_deref(),
                subgroup: e.subgroup,
                comment: e.comment.as_deref(),
            })
            .collect()
    }

    fn set_comment(&mut self, comment: &str) {
        for entry in self.entries_mut() {
            entry.comment = Some(comment.to_string());
        }
    }

    fn archived(key: &str, day: Day<Self>) -> ArchivedDay {
        ArchivedDay::Group {
            key: key.to_string(),
            day,
        }
    }
}

impl LessonSlot for TeacherLesson {
    const AUDIENCE: Audience = Audience::Teacher;

    fn facets(&self) -> Vec<EntryFacets<'_>> {
        vec![EntryFacets {
            kind: self.kind.as_deref(),
            subject: &self.subject,
            counterpart: Some(&self.group),
            subgroup: self.subgroup,
            comment: self.comment.as_deref(),
        }]
    }

    fn set_comment(&mut self, comment: &str) {
        self.comment = Some(comment.to_string());
    }

    fn archived(key: &str, day: Day<Self>) -> ArchivedDay {
        ArchivedDay::Teacher {
            key: key.to_string(),
            day,
        }
    }
}

// ── Days & entities ───────────────────────────────────────────────────────────

/// One date of one entity. `lessons[i]` is lesson number `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "L: DeserializeOwned"))]
pub struct Day<L> {
    pub date: String,
    pub lessons: Vec<Option<L>>,
}

impl<L> Day<L> {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            lessons: Vec::new(),
        }
    }

    pub fn day_index(&self) -> Result<DayIndex, TimetableError> {
        DayIndex::from_string_date(&self.date)
    }

    pub fn week_index(&self) -> Result<WeekIndex, TimetableError> {
        WeekIndex::from_string_date(&self.date)
    }

    pub fn is_sunday(&self) -> bool {
        self.date
            .parse::<StringDate>()
            .map(|d| d.is_sunday())
            .unwrap_or(false)
    }

    /// Place `slot` at lesson `number` (1-based), padding with empty slots.
    pub fn assign(&mut self, number: usize, slot: Option<L>) {
        let Some(index) = number.checked_sub(1) else {
            return;
        };

        if self.lessons.len() <= index {
            self.lessons.resize_with(index + 1, || None);
        }
        self.lessons[index] = slot;
    }

    pub fn trim_trailing_empty(&mut self) {
        while matches!(self.lessons.last(), Some(None)) {
            self.lessons.pop();
        }
    }

    pub fn lesson_count(&self) -> usize {
        self.lessons.iter().filter(|slot| slot.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "L: DeserializeOwned"))]
pub struct Entity<L> {
    pub key: String,
    pub days: Vec<Day<L>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_noticed_day: Option<DayIndex>,
}

impl<L> Entity<L> {
    pub fn new(key: impl Into<String>, days: Vec<Day<L>>) -> Self {
        Self {
            key: key.into(),
            days,
            last_noticed_day: None,
        }
    }

    pub fn lesson_count(&self) -> usize {
        self.days.iter().map(Day::lesson_count).sum()
    }
}

pub type EntityMap<L> = BTreeMap<String, Entity<L>>;

pub fn total_lessons<L>(entities: &EntityMap<L>) -> usize {
    entities.values().map(Entity::lesson_count).sum()
}

// ── Caches ────────────────────────────────────────────────────────────────────

/// Persisted state of one timetable family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "L: DeserializeOwned"))]
pub struct EntryCache<L> {
    #[serde(default, alias = "timetable")]
    pub entities: EntityMap<L>,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_week_index: Option<WeekIndex>,
}

impl<L> Default for EntryCache<L> {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            content_hash: String::new(),
            last_update: None,
            last_changed: None,
            last_week_index: None,
        }
    }
}

/// Staff roster: short name (`Surname I. O.`) → full name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamCache {
    #[serde(default)]
    pub names: BTreeMap<String, String>,
    #[serde(default)]
    pub update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changed: Option<DateTime<Utc>>,
    /// Content hash per configured team page.
    #[serde(default)]
    pub hash: Vec<String>,
}

// ── Events ────────────────────────────────────────────────────────────────────

/// A day handed over for long-term storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArchivedDay {
    Group { key: String, day: Day<GroupLesson> },
    Teacher { key: String, day: Day<TeacherLesson> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayEvent<L> {
    pub key: String,
    pub day: Day<L>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekEvent {
    pub chat_mode: Audience,
    pub week_index: WeekIndex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_pads_and_trim_drops_trailing_empty() {
        let mut day: Day<GroupLesson> = Day::new("01.09.2025");
        day.assign(3, Some(GroupLesson::Single(GroupEntry::new("Математика"))));
        assert_eq!(day.lessons.len(), 3);
        assert!(day.lessons[0].is_none());

        day.assign(5, None);
        assert_eq!(day.lessons.len(), 5);
        day.trim_trailing_empty();
        assert_eq!(day.lessons.len(), 3);
        assert_eq!(day.lesson_count(), 1);

        day.assign(0, None);
        assert_eq!(day.lessons.len(), 3);
    }

    #[test]
    fn test_group_lesson_serializes_untagged() {
        let single = GroupLesson::Single(GroupEntry::new("Физика"));
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json["subject"], "Физика");
        assert!(json.get("subgroup").is_none());
        assert!(json["type"].is_null());

        let parallel = GroupLesson::Parallel(vec![
            GroupEntry { subgroup: Some(1), ..GroupEntry::new("Англ. яз.") },
            GroupEntry { subgroup: Some(2), ..GroupEntry::new("Нем. яз.") },
        ]);
        let text = serde_json::to_string(&parallel).unwrap();
        let back: GroupLesson = serde_json::from_str(&text).unwrap();
        assert_eq!(back, parallel);
    }

    #[test]
    fn test_archived_day_shape() {
        let archived = GroupLesson::archived("51", Day::new("01.09.2025"));
        let json = serde_json::to_value(&archived).unwrap();
        assert_eq!(json["type"], "group");
        assert_eq!(json["key"], "51");
        assert_eq!(json["day"]["date"], "01.09.2025");
    }

    #[test]
    fn test_entry_cache_defaults_from_empty_json() {
        let cache: EntryCache<TeacherLesson> = serde_json::from_str("{}").unwrap();
        assert!(cache.entities.is_empty());
        assert!(cache.last_week_index.is_none());
        assert_eq!(cache.content_hash, "");
    }
}
