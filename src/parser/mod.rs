//! HTML timetable extraction.
//!
//! [`ParserKind`] selects one of four pure page → entities functions:
//! the grid-based v2 parsers ([`table`]) or the legacy v1 parsers
//! ([`legacy`]), each for groups or teachers.

pub mod diff;
pub mod grid;
pub mod legacy;
pub mod lesson;
pub mod table;
pub mod team;
pub mod text;
pub mod validate;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::TimetableError;
use crate::models::{Audience, EntityMap, GroupLesson, TeacherLesson, total_lessons};

pub use lesson::DoubleLessonRule;
pub use table::{ParseOptions, WeekPolicy};
pub use validate::ValidationLimits;

/// Content container candidates, in priority order.
const CONTENT_SELECTORS: [&str; 4] = [
    ".entry .content",
    "#main-p .content",
    ".common-page-left-block .content",
    ".common-page-left-block",
];

static CONTENT_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    CONTENT_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("CONTENT_SELS: hardcoded selector is valid"))
        .collect()
});

static H2_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2").expect("H2_SEL: hardcoded selector is valid"));

static H3_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3").expect("H3_SEL: hardcoded selector is valid"));

// ── Page content ──────────────────────────────────────────────────────────────

/// The element holding the timetable; the last match of the first selector
/// that matches anything.
pub fn content_container(doc: &Html) -> Result<ElementRef<'_>, TimetableError> {
    CONTENT_SELS
        .iter()
        .find_map(|sel| doc.select(sel).last())
        .ok_or(TimetableError::MissingContent)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    /// Whole content container.
    #[default]
    Content,
    /// Only the `<table>` elements inside it.
    Tables,
}

pub fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub fn content_hash(container: ElementRef<'_>, mode: HashMode) -> String {
    match mode {
        HashMode::Content => sha256_hex(&container.inner_html()),
        HashMode::Tables => {
            let tables: Vec<String> = container.select(&table::TABLE_SEL).map(|t| t.html()).collect();
            sha256_hex(&tables.join("\n"))
        }
    }
}

/// Heading/table counts of a content container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureReport {
    pub tables: usize,
    pub h2: usize,
    pub h3: usize,
}

impl StructureReport {
    pub fn of(container: ElementRef<'_>) -> Self {
        Self {
            tables: container.select(&table::TABLE_SEL).count(),
            h2: container.select(&H2_SEL).count(),
            h3: container.select(&H3_SEL).count(),
        }
    }

    /// Tables without `h2` headings usually mean the site layout changed.
    pub fn is_suspicious(&self) -> bool {
        self.tables > 0 && self.h2 == 0
    }
}

// ── Parser family ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserKind {
    GroupV1,
    TeacherV1,
    GroupV2,
    TeacherV2,
}

impl ParserKind {
    pub fn for_audience(audience: Audience, v2: bool) -> Self {
        match (audience, v2) {
            (Audience::Student, false) => ParserKind::GroupV1,
            (Audience::Student, true) => ParserKind::GroupV2,
            (Audience::Teacher, false) => ParserKind::TeacherV1,
            (Audience::Teacher, true) => ParserKind::TeacherV2,
        }
    }

    pub fn audience(self) -> Audience {
        match self {
            ParserKind::GroupV1 | ParserKind::GroupV2 => Audience::Student,
            ParserKind::TeacherV1 | ParserKind::TeacherV2 => Audience::Teacher,
        }
    }

    pub fn is_v2(self) -> bool {
        matches!(self, ParserKind::GroupV2 | ParserKind::TeacherV2)
    }

    /// The v1 parser of the same audience.
    pub fn legacy(self) -> Self {
        Self::for_audience(self.audience(), false)
    }

    pub fn name(self) -> &'static str {
        match self {
            ParserKind::GroupV1 => "group-v1",
            ParserKind::TeacherV1 => "teacher-v1",
            ParserKind::GroupV2 => "group-v2",
            ParserKind::TeacherV2 => "teacher-v2",
        }
    }

    pub fn parse(self, doc: &Html, opts: &ParseOptions) -> Result<Timetable, TimetableError> {
        Ok(match self {
            ParserKind::GroupV1 => Timetable::Groups(legacy::parse_legacy(doc, opts)?),
            ParserKind::TeacherV1 => Timetable::Teachers(legacy::parse_legacy(doc, opts)?),
            ParserKind::GroupV2 => Timetable::Groups(table::parse_tables(doc, opts)?),
            ParserKind::TeacherV2 => Timetable::Teachers(table::parse_tables(doc, opts)?),
        })
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "group-v1" => Ok(ParserKind::GroupV1),
            "teacher-v1" => Ok(ParserKind::TeacherV1),
            "group-v2" | "group" => Ok(ParserKind::GroupV2),
            "teacher-v2" | "teacher" => Ok(ParserKind::TeacherV2),
            other => Err(format!(
                "unknown parser {other:?} (expected group-v1, teacher-v1, group-v2 or teacher-v2)"
            )),
        }
    }
}

// ── Parse result ──────────────────────────────────────────────────────────────

/// Entities of one page, tagged by family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Timetable {
    Groups(EntityMap<GroupLesson>),
    Teachers(EntityMap<TeacherLesson>),
}

impl Timetable {
    pub fn audience(&self) -> Audience {
        match self {
            Timetable::Groups(_) => Audience::Student,
            Timetable::Teachers(_) => Audience::Teacher,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Timetable::Groups(map) => map.len(),
            Timetable::Teachers(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_lessons(&self) -> usize {
        match self {
            Timetable::Groups(map) => total_lessons(map),
            Timetable::Teachers(map) => total_lessons(map),
        }
    }

    pub fn validate(&self, limits: &ValidationLimits) -> Result<(), Vec<String>> {
        match self {
            Timetable::Groups(map) => validate::validate_entities(map, limits),
            Timetable::Teachers(map) => validate::validate_entities(map, limits),
        }
    }

    /// Per-entity day differences against another parse of the same page.
    pub fn diff_lines(&self, other: &Timetable, limit: usize) -> Vec<String> {
        match (self, other) {
            (Timetable::Groups(a), Timetable::Groups(b)) => diff::diff_entities(a, b, limit),
            (Timetable::Teachers(a), Timetable::Teachers(b)) => diff::diff_entities(a, b, limit),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use chrono::{Duration, NaiveDate};

    const WEEKDAYS: [&str; 6] = ["Понедельник", "Вторник", "Среда", "Четверг", "Пятница", "Суббота"];

    /// Monday–Saturday table with `(number, lesson, cabinet)` rows on Monday only.
    pub fn week_table(monday: NaiveDate, rows: &[(&str, &str, &str)]) -> String {
        let mut html = String::from("<table><tr><th>№</th>");
        for (i, name) in WEEKDAYS.iter().enumerate() {
            let date = monday + Duration::days(i as i64);
            html.push_str(&format!(r#"<th colspan="2">{name}, {}</th>"#, date.format("%d.%m.%Y")));
        }
        html.push_str("</tr>");

        for (number, lesson, cabinet) in rows {
            html.push_str(&format!("<tr><td>{number}</td><td>{lesson}</td><td>{cabinet}</td>"));
            html.push_str(&"<td></td><td></td>".repeat(WEEKDAYS.len() - 1));
            html.push_str("</tr>");
        }

        html.push_str("</table>");
        html
    }

    /// A page with `(heading, table)` sections in the usual content container.
    pub fn timetable_page(sections: &[(&str, String)]) -> String {
        let body: String = sections
            .iter()
            .map(|(heading, table)| format!("<h2>{heading}</h2>\n{table}\n"))
            .collect();
        format!(
            r#"<html><body><div class="entry"><div class="content">{body}</div></div></body></html>"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_fixtures::{timetable_page, week_table};

    #[test]
    fn test_content_container_priority() {
        let doc = Html::parse_document(
            r#"<div class="common-page-left-block"><div class="content">a</div></div>
               <div class="entry"><div class="content">b</div></div>
               <div class="entry"><div class="content">c</div></div>"#,
        );
        let container = content_container(&doc).unwrap();
        assert_eq!(container.inner_html(), "c");

        let empty = Html::parse_document("<p>nothing</p>");
        assert!(matches!(content_container(&empty), Err(TimetableError::MissingContent)));
    }

    #[test]
    fn test_content_hash_modes() {
        let page = |extra: &str| {
            Html::parse_document(&format!(
                r#"<div class="entry"><div class="content"><p>{extra}</p><table><tr><td>1</td></tr></table></div></div>"#
            ))
        };
        let a = page("обновлено 1 сентября");
        let b = page("обновлено 2 сентября");
        let hash = |doc: &Html, mode| content_hash(content_container(doc).unwrap(), mode);

        assert_ne!(hash(&a, HashMode::Content), hash(&b, HashMode::Content));
        assert_eq!(hash(&a, HashMode::Tables), hash(&b, HashMode::Tables));
        assert_eq!(hash(&a, HashMode::Content).len(), 64);
    }

    #[test]
    fn test_structure_report() {
        let doc = Html::parse_document(
            r#"<div class="entry"><div class="content"><h3>x</h3><table></table></div></div>"#,
        );
        let report = StructureReport::of(content_container(&doc).unwrap());
        assert_eq!(report, StructureReport { tables: 1, h2: 0, h3: 1 });
        assert!(report.is_suspicious());
    }

    #[test]
    fn test_parser_kind_lookup() {
        assert_eq!(ParserKind::GroupV2.legacy(), ParserKind::GroupV1);
        assert_eq!(ParserKind::TeacherV2.audience(), Audience::Teacher);
        assert_eq!("teacher-v1".parse::<ParserKind>(), Ok(ParserKind::TeacherV1));
        assert!("v3".parse::<ParserKind>().is_err());
    }

    #[test]
    fn test_v1_and_v2_agree_on_simple_page() {
        let monday = chrono::NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let html = timetable_page(&[(
            "Группа - 51",
            week_table(monday, &[("1", "Математика (лк) Иванов И.И.", "215"), ("2", "Химия (пз)", "-")]),
        )]);
        let doc = Html::parse_document(&html);
        let opts = ParseOptions {
            today: monday,
            week_policy: WeekPolicy::PreferCurrent,
            sunday_hold_current: true,
            allow_two_tables: true,
            strict: false,
            header_scan_rows: 5,
            min_days_in_table: 5,
            double_lesson: DoubleLessonRule {
                placeholder_type: "ф-в".into(),
                comment: "2 часа".into(),
            },
        };

        let v2 = ParserKind::GroupV2.parse(&doc, &opts).unwrap();
        let v1 = ParserKind::GroupV1.parse(&doc, &opts).unwrap();

        assert_eq!(v2.len(), 1);
        assert_eq!(v2.total_lessons(), 2);
        assert!(v2.diff_lines(&v1, 20).is_empty(), "{:?}", v2.diff_lines(&v1, 20));
    }
}
