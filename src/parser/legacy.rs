//! v1 parser: regex rules over physical cells, no span normalisation.
//!
//! Expected layout: one header row of day labels, then rows of
//! `number, (lesson, cabinet) × days`. No week policy applies: every headed
//! table is merged into its entity.

use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;
use tracing::warn;

use super::grid::{row_cells, table_rows};
use super::lesson::{cabinet_lines, parse_group_part, parse_type};
use super::table::{ParseOptions, TABLE_SEL, TableSlot, absorb_entity, clear_empty_sundays, find_heading};
use super::text::{clean_text, element_text, extract_lines, parse_day_label, parse_slot_number};
use super::content_container;
use crate::error::TimetableError;
use crate::models::{Day, EntityMap, GroupEntry, GroupLesson, TeacherLesson};

static SUBGROUP_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\s*\S").expect("SUBGROUP_PREFIX_RE: hardcoded regex is valid")
});

static GROUP_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)\.\s*)?([^(]+?)\s*(?:\(([^)]+)\)\s*(.*))?$")
        .expect("GROUP_BLOCK_RE: hardcoded regex is valid")
});

static TEACHER_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s+[-–]\s+([^(]+?)\s*(?:\(([^)]+)\))?\s*$")
        .expect("TEACHER_BLOCK_RE: hardcoded regex is valid")
});

static TEACHER_BLOCK_TIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)-([^(]+?)\s*(?:\(([^)]+)\))?\s*$")
        .expect("TEACHER_BLOCK_TIGHT_RE: hardcoded regex is valid")
});

/// A lesson family the v1 rules know how to read.
pub trait LegacySlot: TableSlot {
    fn from_cell(lines: &[String], cabinets: &[Option<String>]) -> Option<Self>;
}

fn cabinet_for(cabinets: &[Option<String>], index: usize) -> Option<String> {
    match cabinets {
        [only] => only.clone(),
        _ => cabinets.get(index).cloned().flatten(),
    }
}

impl LegacySlot for GroupLesson {
    fn from_cell(lines: &[String], cabinets: &[Option<String>]) -> Option<Self> {
        let mut blocks: Vec<GroupEntry> = Vec::new();

        for line in lines {
            let starts_block = blocks.is_empty() || SUBGROUP_PREFIX_RE.is_match(line);
            if starts_block {
                let Some(caps) = GROUP_BLOCK_RE.captures(line) else {
                    continue;
                };
                let Some(subject) = caps.get(2).and_then(|m| clean_text(m.as_str())) else {
                    continue;
                };
                blocks.push(GroupEntry {
                    subgroup: caps.get(1).and_then(|m| m.as_str().parse().ok()),
                    kind: caps.get(3).and_then(|m| clean_text(m.as_str())),
                    teacher: caps.get(4).and_then(|m| clean_text(m.as_str())),
                    ..GroupEntry::new(subject)
                });
                continue;
            }

            let Some(block) = blocks.last_mut() else {
                continue;
            };
            if block.kind.is_none() {
                if let Some(kind) = parse_type(line) {
                    block.kind = Some(kind);
                    continue;
                }
            }
            block.teacher = Some(match block.teacher.take() {
                Some(teacher) => format!("{teacher}, {line}"),
                None => line.clone(),
            });
        }

        for (i, block) in blocks.iter_mut().enumerate() {
            block.cabinet = cabinet_for(cabinets, i);
        }

        match blocks.len() {
            0 => None,
            1 if blocks[0].subgroup.is_none() => blocks.pop().map(GroupLesson::Single),
            _ => Some(GroupLesson::Parallel(blocks)),
        }
    }
}

impl LegacySlot for TeacherLesson {
    fn from_cell(lines: &[String], cabinets: &[Option<String>]) -> Option<Self> {
        let mut lesson: Option<TeacherLesson> = None;

        for line in lines {
            if let Some(current) = lesson.as_mut() {
                if current.kind.is_none() {
                    current.kind = parse_type(line);
                }
                continue;
            }

            let Some(caps) = TEACHER_BLOCK_RE
                .captures(line)
                .or_else(|| TEACHER_BLOCK_TIGHT_RE.captures(line))
            else {
                continue;
            };
            let Some((subgroup, group)) = caps.get(1).and_then(|m| parse_group_part(m.as_str())) else {
                continue;
            };
            let Some(subject) = caps.get(2).and_then(|m| clean_text(m.as_str())) else {
                continue;
            };

            lesson = Some(TeacherLesson {
                subject,
                kind: caps.get(3).and_then(|m| clean_text(m.as_str())),
                subgroup,
                group,
                cabinet: cabinet_for(cabinets, 0),
                comment: None,
            });
        }

        lesson
    }
}

fn parse_legacy_table<L: LegacySlot>(table: ElementRef<'_>, opts: &ParseOptions) -> Option<Vec<Day<L>>> {
    let rows = table_rows(table);

    let (header_index, dates) = rows.iter().take(opts.header_scan_rows).enumerate().find_map(|(i, row)| {
        let dates: Vec<String> = row_cells(*row)
            .into_iter()
            .filter_map(|cell| parse_day_label(&element_text(cell), opts.today))
            .map(|label| label.date)
            .collect();
        (!dates.is_empty()).then_some((i, dates))
    })?;

    let mut days: Vec<Day<L>> = dates.into_iter().map(Day::new).collect();

    for row in rows.iter().skip(header_index + 1) {
        let cells = row_cells(*row);
        let Some(first) = cells.first() else {
            continue;
        };
        let number = match parse_slot_number(&element_text(*first)) {
            Ok(Some(number)) => number,
            Ok(None) => continue,
            Err(number) => {
                warn!(number, "lesson number out of range, row skipped");
                continue;
            }
        };

        for (i, day) in days.iter_mut().enumerate() {
            let lines = extract_lines(cells.get(1 + 2 * i).copied());
            let cabinets = cabinet_lines(&extract_lines(cells.get(2 + 2 * i).copied()));
            day.assign(number, L::from_cell(&lines, &cabinets));
        }
    }

    for day in &mut days {
        day.trim_trailing_empty();
    }
    Some(days)
}

/// Parse every headed table of a page with the v1 rules.
pub fn parse_legacy<L: LegacySlot>(doc: &Html, opts: &ParseOptions) -> Result<EntityMap<L>, TimetableError> {
    let content = content_container(doc)?;
    let mut entities: EntityMap<L> = EntityMap::new();

    for table in content.select(&TABLE_SEL) {
        let Some(key) = find_heading(table, L::HEADING).and_then(|h| L::entity_key(&h)) else {
            continue;
        };
        let Some(days) = parse_legacy_table::<L>(table, opts) else {
            continue;
        };
        absorb_entity(&mut entities, key, days, true);
    }

    clear_empty_sundays(&mut entities);
    Ok(entities)
}
