//! Cell line lists → structured lesson entries.
//!
//! Group and teacher cells share the line classification order:
//! combined line, bare `(type)`, subject line, counterpart line, and
//! (groups only) co-teacher continuation.

use regex::Regex;
use std::sync::LazyLock;

use super::text::{clean_text, is_teacher_line, remove_dashes};
use crate::error::TimetableError;
use crate::models::{Day, EntryFacets, GroupEntry, GroupLesson, LessonSlot, TeacherLesson};

static GROUP_COMBINED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)\s*[.)]\s*)?(.+?)\s*\(([^)]+)\)\s*(.+)?$")
        .expect("GROUP_COMBINED_RE: hardcoded regex is valid")
});

/// `group - subject (type)` with a spaced dash, so `ИС-21 - ...` keeps its group.
static TEACHER_SPACED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)\s*[.)]\s*)?(.+?)\s+[-–]\s+(.+?)(?:\s*\(([^)]+)\))?\s*$")
        .expect("TEACHER_SPACED_RE: hardcoded regex is valid")
});

static TEACHER_COMBINED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)\s*[.)]\s*)?(.+?)\s*-\s*(.+?)(?:\s*\(([^)]+)\))?\s*$")
        .expect("TEACHER_COMBINED_RE: hardcoded regex is valid")
});

static TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((.+)\)$").expect("TYPE_RE: hardcoded regex is valid"));

static SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)\s*[.)]\s*)?(.+)$").expect("SUBJECT_RE: hardcoded regex is valid")
});

static GROUP_PART_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)\.)?(.+)$").expect("GROUP_PART_RE: hardcoded regex is valid")
});

fn capture_u32(caps: &regex::Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index).and_then(|m| m.as_str().parse().ok())
}

fn capture_text(caps: &regex::Captures<'_>, index: usize) -> Option<String> {
    caps.get(index).and_then(|m| clean_text(m.as_str()))
}

// ── Line classifiers ──────────────────────────────────────────────────────────

/// `(лк)` → `Some("лк")`
pub fn parse_type(line: &str) -> Option<String> {
    let caps = TYPE_RE.captures(line)?;
    capture_text(&caps, 1)
}

/// `[subgroup.]subject`
pub fn parse_subject_line(line: &str) -> Option<(Option<u32>, String)> {
    let caps = SUBJECT_RE.captures(line)?;
    Some((capture_u32(&caps, 1), capture_text(&caps, 2)?))
}

/// `[subgroup.]group` with all whitespace removed. `"2. 51"` → `(Some(2), "51")`
pub fn parse_group_part(value: &str) -> Option<(Option<u32>, String)> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    match GROUP_PART_RE.captures(&cleaned) {
        Some(caps) => Some((capture_u32(&caps, 1), capture_text(&caps, 2)?)),
        None => Some((None, cleaned)),
    }
}

fn parse_group_combined(line: &str) -> Option<GroupEntry> {
    let caps = GROUP_COMBINED_RE.captures(line)?;
    Some(GroupEntry {
        subgroup: capture_u32(&caps, 1),
        subject: capture_text(&caps, 2)?,
        kind: capture_text(&caps, 3),
        teacher: capture_text(&caps, 4),
        cabinet: None,
        comment: None,
    })
}

fn parse_teacher_combined(line: &str) -> Option<TeacherLesson> {
    let caps = TEACHER_SPACED_RE
        .captures(line)
        .or_else(|| TEACHER_COMBINED_RE.captures(line))?;

    let (group_subgroup, group) = parse_group_part(caps.get(2)?.as_str())?;
    Some(TeacherLesson {
        subject: capture_text(&caps, 3)?,
        kind: capture_text(&caps, 4),
        subgroup: capture_u32(&caps, 1).or(group_subgroup),
        group,
        cabinet: None,
        comment: None,
    })
}

// ── State machines ────────────────────────────────────────────────────────────

#[derive(Default)]
struct PendingGroup {
    subgroup: Option<u32>,
    subject: Option<String>,
    kind: Option<String>,
    teacher: Option<String>,
}

impl PendingGroup {
    fn start(line: &str) -> Self {
        match parse_subject_line(line) {
            Some((subgroup, subject)) => Self {
                subgroup,
                subject: Some(subject),
                ..Default::default()
            },
            None => Self::default(),
        }
    }

    fn finish(self) -> Option<GroupEntry> {
        Some(GroupEntry {
            subgroup: self.subgroup,
            subject: self.subject?,
            kind: self.kind,
            teacher: self.teacher,
            cabinet: None,
            comment: None,
        })
    }
}

pub fn parse_group_entries(lines: &[String]) -> Vec<GroupEntry> {
    let mut entries = Vec::new();
    let mut pending = PendingGroup::default();

    for line in lines {
        if let Some(entry) = parse_group_combined(line) {
            entries.extend(std::mem::take(&mut pending).finish());
            entries.push(entry);
            continue;
        }

        if pending.subject.is_some() {
            if let Some(kind) = parse_type(line) {
                pending.kind = Some(kind);
                continue;
            }
        }

        if pending.subject.is_none() {
            pending = PendingGroup::start(line);
            continue;
        }

        if pending.teacher.is_none() {
            pending.teacher = Some(line.clone());
            continue;
        }

        if is_teacher_line(line) {
            if let Some(teacher) = pending.teacher.as_mut() {
                teacher.push_str(", ");
                teacher.push_str(line);
            }
            continue;
        }

        entries.extend(std::mem::take(&mut pending).finish());
        pending = PendingGroup::start(line);
    }

    entries.extend(pending.finish());
    entries
}

#[derive(Default)]
struct PendingTeacher {
    subgroup: Option<u32>,
    subject: Option<String>,
    kind: Option<String>,
    group: Option<String>,
}

impl PendingTeacher {
    fn start(line: &str) -> Self {
        match parse_subject_line(line) {
            Some((subgroup, subject)) => Self {
                subgroup,
                subject: Some(subject),
                ..Default::default()
            },
            None => Self::default(),
        }
    }

    fn finish(self) -> Option<TeacherLesson> {
        Some(TeacherLesson {
            subject: self.subject?,
            kind: self.kind,
            subgroup: self.subgroup,
            group: self.group?,
            cabinet: None,
            comment: None,
        })
    }
}

pub fn parse_teacher_entries(lines: &[String]) -> Vec<TeacherLesson> {
    let mut entries = Vec::new();
    let mut pending = PendingTeacher::default();

    for line in lines {
        if let Some(entry) = parse_teacher_combined(line) {
            entries.extend(std::mem::take(&mut pending).finish());
            entries.push(entry);
            continue;
        }

        if pending.subject.is_some() {
            if let Some(kind) = parse_type(line) {
                pending.kind = Some(kind);
                continue;
            }
        }

        if pending.subject.is_none() {
            pending = PendingTeacher::start(line);
            continue;
        }

        if pending.group.is_none() {
            if let Some((subgroup, group)) = parse_group_part(line) {
                pending.subgroup = pending.subgroup.or(subgroup);
                pending.group = Some(group);
            }
            continue;
        }

        entries.extend(std::mem::take(&mut pending).finish());
        pending = PendingTeacher::start(line);
    }

    entries.extend(pending.finish());
    entries
}

// ── Cabinets ──────────────────────────────────────────────────────────────────

trait CabinetTarget {
    fn subgroup(&self) -> Option<u32>;
    fn set_cabinet(&mut self, cabinet: Option<String>);
}

impl CabinetTarget for GroupEntry {
    fn subgroup(&self) -> Option<u32> {
        self.subgroup
    }

    fn set_cabinet(&mut self, cabinet: Option<String>) {
        self.cabinet = cabinet;
    }
}

impl CabinetTarget for TeacherLesson {
    fn subgroup(&self) -> Option<u32> {
        self.subgroup
    }

    fn set_cabinet(&mut self, cabinet: Option<String>) {
        self.cabinet = cabinet;
    }
}

/// Cabinet cell lines with dash placeholders blanked out.
pub fn cabinet_lines(lines: &[String]) -> Vec<Option<String>> {
    lines.iter().map(|line| remove_dashes(line)).collect()
}

fn apply_cabinets<T: CabinetTarget>(entries: &mut [T], cabinets: &[Option<String>]) {
    if entries.is_empty() || !cabinets.iter().any(Option::is_some) {
        return;
    }

    if let [only] = cabinets {
        for entry in entries.iter_mut() {
            entry.set_cabinet(only.clone());
        }
        return;
    }

    let last = cabinets.len() - 1;
    let by_subgroup = entries.iter().any(|e| e.subgroup().is_some());

    for (i, entry) in entries.iter_mut().enumerate() {
        let by_index = by_subgroup
            .then(|| entry.subgroup())
            .flatten()
            .and_then(|sg| (sg as usize).checked_sub(1))
            .filter(|&idx| idx < cabinets.len());

        let index = by_index.unwrap_or(i.min(last));
        entry.set_cabinet(cabinets[index].clone());
    }
}

// ── Slots ─────────────────────────────────────────────────────────────────────

fn unparseable(lines: &[String]) -> TimetableError {
    TimetableError::UnparseableLesson(lines.join(" / "))
}

/// Parse one group lesson slot from its lesson and cabinet cell lines.
pub fn parse_group_slot(
    lines: &[String],
    cabinets: &[String],
    strict: bool,
) -> Result<Option<GroupLesson>, TimetableError> {
    if lines.is_empty() {
        return Ok(None);
    }

    let mut entries = parse_group_entries(lines);
    if entries.is_empty() {
        return if strict { Err(unparseable(lines)) } else { Ok(None) };
    }

    apply_cabinets(&mut entries, &cabinet_lines(cabinets));

    if entries.len() == 1 && entries[0].subgroup.is_none() {
        return Ok(entries.pop().map(GroupLesson::Single));
    }
    Ok(Some(GroupLesson::Parallel(entries)))
}

/// Parse one teacher lesson slot; only the first entry is kept.
pub fn parse_teacher_slot(
    lines: &[String],
    cabinets: &[String],
    strict: bool,
) -> Result<Option<TeacherLesson>, TimetableError> {
    if lines.is_empty() {
        return Ok(None);
    }

    let mut entries = parse_teacher_entries(lines);
    if entries.is_empty() {
        return if strict { Err(unparseable(lines)) } else { Ok(None) };
    }

    apply_cabinets(&mut entries, &cabinet_lines(cabinets));
    Ok(entries.into_iter().next())
}

// ── Double lessons ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DoubleLessonRule {
    /// Entry type that marks the first half of a split lesson.
    pub placeholder_type: String,
    pub comment: String,
}

fn same_lesson(a: &EntryFacets<'_>, b: &EntryFacets<'_>) -> bool {
    a.kind == b.kind && a.subject == b.subject && a.counterpart == b.counterpart && a.subgroup == b.subgroup
}

fn find_second_half<L: LessonSlot>(lessons: &[Option<L>], index: usize, rule: &DoubleLessonRule) -> Option<usize> {
    let facets = lessons.get(index)?.as_ref()?.facets();
    let marked = !facets.is_empty()
        && facets
            .iter()
            .all(|f| f.kind == Some(rule.placeholder_type.as_str()) && f.comment.is_none());
    if !marked {
        return None;
    }

    (index + 1..lessons.len()).rev().find(|&j| {
        lessons[j].as_ref().is_some_and(|other| {
            let other = other.facets();
            other.len() == facets.len() && facets.iter().zip(&other).any(|(a, b)| same_lesson(a, b))
        })
    })
}

/// Merge `A(placeholder) … A` into one annotated slot, then trim the day.
pub fn collapse_double_lessons<L: LessonSlot>(day: &mut Day<L>, rule: &DoubleLessonRule) {
    for i in 0..day.lessons.len() {
        let Some(j) = find_second_half(&day.lessons, i, rule) else {
            continue;
        };

        day.lessons[j] = None;
        if let Some(slot) = day.lessons[i].as_mut() {
            slot.set_comment(&rule.comment);
        }
    }

    day.trim_trailing_empty();
}
