//! Timetable tables on a page: week selection and table → days.

use chrono::{Datelike, NaiveDate, Weekday};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::grid::{DayRange, HeaderOptions, TableGrid, build_table_grid, locate_days};
use super::lesson::{DoubleLessonRule, collapse_double_lessons, parse_group_slot, parse_teacher_slot};
use super::text::{clean_text, element_text, extract_lines, parse_slot_number};
use super::content_container;
use crate::calendar::WeekIndex;
use crate::error::TimetableError;
use crate::merge::merge_days;
use crate::models::{Day, Entity, EntityMap, GroupLesson, LessonSlot, TeacherLesson};

pub(crate) static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("TABLE_SEL: hardcoded selector is valid"));

/// Element siblings inspected above a table when looking for its heading.
const MAX_HEADING_DISTANCE: usize = 12;

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WeekPolicy {
    #[default]
    PreferCurrent,
    Current,
    Closest,
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub today: NaiveDate,
    pub week_policy: WeekPolicy,
    pub sunday_hold_current: bool,
    pub allow_two_tables: bool,
    pub strict: bool,
    pub header_scan_rows: usize,
    pub min_days_in_table: usize,
    pub double_lesson: DoubleLessonRule,
}

impl ParseOptions {
    pub fn current_week(&self) -> WeekIndex {
        WeekIndex::from_date(self.today)
    }

    pub fn is_sunday(&self) -> bool {
        self.today.weekday() == Weekday::Sun
    }

    fn header(&self) -> HeaderOptions {
        HeaderOptions {
            max_scan_rows: self.header_scan_rows,
            min_days: self.min_days_in_table,
            today: self.today,
        }
    }
}

// ── Slot families ─────────────────────────────────────────────────────────────

/// A lesson family that can be read from a grid-based timetable table.
pub trait TableSlot: LessonSlot {
    /// Word a table heading must start with.
    const HEADING: &'static str;

    /// Entity key from a heading such as `Группа - 51*`.
    fn entity_key(heading: &str) -> Option<String>;

    fn parse_slot(lines: &[String], cabinets: &[String], strict: bool) -> Result<Option<Self>, TimetableError>;
}

fn label_after_dash(heading: &str, keyword: &str) -> Option<String> {
    let text = clean_text(heading)?;
    if !text.to_lowercase().starts_with(keyword) {
        return None;
    }
    let (_, rest) = text.split_once('-')?;
    clean_text(rest)
}

impl TableSlot for GroupLesson {
    const HEADING: &'static str = "группа";

    fn entity_key(heading: &str) -> Option<String> {
        let label = label_after_dash(heading, Self::HEADING)?;
        let key = label.strip_suffix('*').unwrap_or(&label).trim();
        (!key.is_empty()).then(|| key.to_string())
    }

    fn parse_slot(lines: &[String], cabinets: &[String], strict: bool) -> Result<Option<Self>, TimetableError> {
        parse_group_slot(lines, cabinets, strict)
    }
}

impl TableSlot for TeacherLesson {
    const HEADING: &'static str = "преподаватель";

    fn entity_key(heading: &str) -> Option<String> {
        label_after_dash(heading, Self::HEADING)
    }

    fn parse_slot(lines: &[String], cabinets: &[String], strict: bool) -> Result<Option<Self>, TimetableError> {
        parse_teacher_slot(lines, cabinets, strict)
    }
}

// ── Table discovery ───────────────────────────────────────────────────────────

/// Nearest `h1`–`h4` above the table whose text contains `keyword`.
pub fn find_heading(table: ElementRef<'_>, keyword: &str) -> Option<String> {
    for element in table
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .take(MAX_HEADING_DISTANCE)
    {
        let tag = element.value().name();
        if matches!(tag, "h1" | "h2" | "h3" | "h4") {
            if let Some(text) = clean_text(&element_text(element)) {
                if text.to_lowercase().contains(keyword) {
                    return Some(text);
                }
            }
        }

        if tag == "table" {
            break;
        }
    }

    None
}

/// A table with a valid day header.
pub struct Candidate<'a> {
    pub table: ElementRef<'a>,
    pub grid: TableGrid<'a>,
    pub header_row: usize,
    pub ranges: Vec<DayRange>,
    /// Week of the first parseable header date.
    pub week: WeekIndex,
}

pub fn find_candidates<'a>(tables: &[ElementRef<'a>], opts: &ParseOptions) -> Vec<Candidate<'a>> {
    let header = opts.header();
    let mut candidates = Vec::new();

    for &table in tables {
        let grid = build_table_grid(table);
        let Some((header_row, ranges)) = locate_days(&grid, &header) else {
            continue;
        };
        let Some(week) = ranges
            .iter()
            .find_map(|range| WeekIndex::from_string_date(&range.date).ok())
        else {
            continue;
        };

        candidates.push(Candidate {
            table,
            grid,
            header_row,
            ranges,
            week,
        });
    }

    candidates
}

fn closest_week(weeks: &[WeekIndex], current: WeekIndex) -> Option<WeekIndex> {
    // Ties go to the later week.
    weeks
        .iter()
        .copied()
        .min_by_key(|week| ((week.value() - current.value()).abs(), *week < current))
}

/// Pick the week to parse among the weeks the page publishes.
pub fn select_week(
    weeks: &[WeekIndex],
    current: WeekIndex,
    is_sunday: bool,
    policy: WeekPolicy,
    sunday_hold_current: bool,
) -> Option<WeekIndex> {
    if weeks.contains(&current) {
        return Some(current);
    }

    match policy {
        WeekPolicy::Current => None,
        WeekPolicy::Closest => closest_week(weeks, current),
        WeekPolicy::PreferCurrent => {
            let nearest_past = weeks.iter().copied().filter(|w| *w < current).max();
            if sunday_hold_current && is_sunday && nearest_past.is_some() {
                return nearest_past;
            }

            let nearest_future = weeks.iter().copied().filter(|w| *w > current).min();
            nearest_future.or_else(|| closest_week(weeks, current))
        }
    }
}

pub fn select_candidates<'a>(candidates: Vec<Candidate<'a>>, opts: &ParseOptions) -> Vec<Candidate<'a>> {
    let mut weeks: Vec<WeekIndex> = Vec::new();
    for candidate in &candidates {
        if !weeks.contains(&candidate.week) {
            weeks.push(candidate.week);
        }
    }

    let Some(target) = select_week(
        &weeks,
        opts.current_week(),
        opts.is_sunday(),
        opts.week_policy,
        opts.sunday_hold_current,
    ) else {
        return Vec::new();
    };

    debug!(weeks = ?weeks, target = %target, "selected timetable week");
    candidates.into_iter().filter(|c| c.week == target).collect()
}

// ── Table → days ──────────────────────────────────────────────────────────────

/// Read lesson rows below the header into one `Day` per day range.
pub fn parse_candidate<L: TableSlot>(candidate: &Candidate<'_>, strict: bool) -> Result<Vec<Day<L>>, TimetableError> {
    let grid = &candidate.grid;
    let mut days: Vec<Day<L>> = candidate.ranges.iter().map(|r| Day::new(r.date.clone())).collect();

    for row in candidate.header_row + 1..grid.height {
        let Some(number_cell) = grid.origin_cell(row, 0) else {
            continue;
        };
        let number = match parse_slot_number(&element_text(number_cell)) {
            Ok(Some(number)) => number,
            Ok(None) => continue,
            Err(number) => {
                warn!(number, row, "lesson number out of range, row skipped");
                continue;
            }
        };

        for (range, day) in candidate.ranges.iter().zip(days.iter_mut()) {
            let lines = extract_lines(grid.origin_cell(row, range.start_column));
            let cabinets = if range.column_span > 1 {
                extract_lines(grid.origin_cell(row, range.start_column + 1))
            } else {
                Vec::new()
            };

            day.assign(number, L::parse_slot(&lines, &cabinets, strict)?);
        }
    }

    Ok(days)
}

/// Add one table's days for `key`, merging into an earlier table of the
/// same key unless `allow_merge` is off (then the later table is dropped).
pub fn absorb_entity<L: Clone + PartialEq>(entities: &mut EntityMap<L>, key: String, days: Vec<Day<L>>, allow_merge: bool) {
    match entities.entry(key) {
        Entry::Vacant(slot) => {
            let key = slot.key().clone();
            slot.insert(Entity::new(key, days));
        }
        Entry::Occupied(mut slot) => {
            if !allow_merge {
                return;
            }
            let existing = slot.get_mut();
            let cached = std::mem::take(&mut existing.days);
            existing.days = merge_days(days, cached).merged_days;
        }
    }
}

/// Sundays without a single lesson are not kept.
pub fn clear_empty_sundays<L>(entities: &mut EntityMap<L>) {
    for entity in entities.values_mut() {
        entity.days.retain(|day| !(day.is_sunday() && day.lesson_count() == 0));
    }
}

/// Parse every selected timetable table of a page into entities.
pub fn parse_tables<L: TableSlot>(doc: &Html, opts: &ParseOptions) -> Result<EntityMap<L>, TimetableError> {
    let content = content_container(doc)?;
    let tables: Vec<ElementRef<'_>> = content.select(&TABLE_SEL).collect();

    let candidates = find_candidates(&tables, opts);
    if candidates.is_empty() && tables.len() == 1 && opts.strict {
        return Err(TimetableError::NoTimetable);
    }

    let mut entities: EntityMap<L> = EntityMap::new();

    for candidate in select_candidates(candidates, opts) {
        let Some(heading) = find_heading(candidate.table, L::HEADING) else {
            continue;
        };
        let Some(key) = L::entity_key(&heading) else {
            continue;
        };

        let days = parse_candidate::<L>(&candidate, opts.strict)?;
        absorb_entity(&mut entities, key, days, opts.allow_two_tables);
    }

    clear_empty_sundays(&mut entities);
    for entity in entities.values_mut() {
        for day in &mut entity.days {
            collapse_double_lessons(day, &opts.double_lesson);
        }
    }

    Ok(entities)
}

// ── Post-parse week filter ────────────────────────────────────────────────────

/// Narrow each entity to one week under the `current` / `closest` policies.
///
/// An entity keeps all its days when the filter would leave none.
pub fn filter_entity_weeks<L>(entities: &mut EntityMap<L>, policy: WeekPolicy, current: WeekIndex) {
    if policy == WeekPolicy::PreferCurrent {
        return;
    }

    for entity in entities.values_mut() {
        let mut weeks: Vec<WeekIndex> = entity.days.iter().filter_map(|d| d.week_index().ok()).collect();
        weeks.dedup();

        let target = if weeks.contains(&current) || policy == WeekPolicy::Current {
            Some(current)
        } else {
            closest_week(&weeks, current)
        };
        let Some(target) = target else {
            continue;
        };

        if entity.days.iter().any(|d| d.week_index().ok() == Some(target)) {
            entity.days.retain(|d| d.week_index().ok() == Some(target));
        }
    }
}
