use chrono::{Datelike, NaiveDate};
use regex::Regex;
use scraper::ElementRef;
use std::sync::LazyLock;

use crate::calendar::StringDate;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})\.(\d{1,2})(?:\.(\d{2,4}))?").expect("DATE_RE: hardcoded regex is valid")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("NUMBER_RE: hardcoded regex is valid"));

static TEACHER_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-ZА-ЯЁ][a-zа-яё-]+\s+[A-ZА-ЯЁ]\.\s*[A-ZА-ЯЁ]?\.?$")
        .expect("TEACHER_LINE_RE: hardcoded regex is valid")
});

static DASHES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-(\s*-)*$").expect("DASHES_RE: hardcoded regex is valid"));

/// Highest first-column number read as a lesson slot.
pub const MAX_LESSON_NUMBER: usize = 16;

const DAY_NAMES: [&str; 7] = [
    "понедельник",
    "вторник",
    "среда",
    "четверг",
    "пятница",
    "суббота",
    "воскресенье",
];

/// Block-level tags that end the current line.
const BLOCK_TAGS: [&str; 4] = ["p", "div", "tr", "li"];

// ── Whitespace ────────────────────────────────────────────────────────────────

/// Collapse whitespace runs (including `&nbsp;`) and trim.
/// `"  a \n b "` → `Some("a b")` | `"   "` → `None`
pub fn clean_text(text: &str) -> Option<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// All text below an element, as `textContent` would give it.
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Cabinet placeholder lines such as `-` or `- -` mean "no cabinet".
pub fn remove_dashes(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() || DASHES_RE.is_match(text) {
        None
    } else {
        Some(text.to_string())
    }
}

// ── Cell segmentation ─────────────────────────────────────────────────────────

/// Split a cell into clean, non-empty lines.
///
/// Text accumulates until a `<br>` or a block element boundary, which flushes
/// the buffer as one line.
pub fn extract_lines(cell: Option<ElementRef<'_>>) -> Vec<String> {
    let Some(cell) = cell else {
        return Vec::new();
    };

    let mut segmenter = Segmenter::default();
    segmenter.walk(cell);
    segmenter.flush();
    segmenter.lines
}

#[derive(Default)]
struct Segmenter {
    buffer: String,
    lines: Vec<String>,
}

impl Segmenter {
    fn flush(&mut self) {
        if let Some(line) = clean_text(&self.buffer) {
            self.lines.push(line);
        }
        self.buffer.clear();
    }

    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                self.buffer.push_str(text);
                continue;
            }

            let Some(child) = ElementRef::wrap(child) else {
                continue;
            };

            let tag = child.value().name();
            if tag.eq_ignore_ascii_case("br") {
                self.flush();
                continue;
            }

            let block = BLOCK_TAGS.iter().any(|b| tag.eq_ignore_ascii_case(b));
            if block {
                self.flush();
            }
            self.walk(child);
            if block {
                self.flush();
            }
        }
    }
}

// ── Day labels ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayLabel {
    /// Canonical `dd.mm.yyyy`.
    pub date: String,
    pub weekday: Option<String>,
}

/// Normalise `d.m.yy` / `dd.mm.yyyy` to the canonical form.
/// `"1.9.25"` → `Some("01.09.2025")` | `"31.02.2025"` → `None`
pub fn normalize_date(value: &str) -> Option<String> {
    let caps = DATE_RE.captures(value.trim())?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year = caps.get(3)?.as_str();
    let year: i32 = match year.len() {
        2 => 2000 + year.parse::<i32>().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year, month, day).map(|d| StringDate::new(d).to_string())
}

/// Parse a header cell such as `Понедельник, 01.09.2025` or `01.09`.
///
/// A label without a year takes the year that puts the date closest to `today`.
pub fn parse_day_label(text: &str, today: NaiveDate) -> Option<DayLabel> {
    let text = clean_text(text)?;
    let caps = DATE_RE.captures(&text)?;

    let date = match caps.get(3) {
        Some(_) => normalize_date(caps.get(0)?.as_str())?,
        None => {
            let day: u32 = caps.get(1)?.as_str().parse().ok()?;
            let month: u32 = caps.get(2)?.as_str().parse().ok()?;
            closest_year(day, month, today)?
        }
    };

    let lower = text.to_lowercase();
    let weekday = DAY_NAMES
        .iter()
        .find(|name| lower.contains(*name))
        .map(|name| capitalize(name));

    Some(DayLabel { date, weekday })
}

fn closest_year(day: u32, month: u32, today: NaiveDate) -> Option<String> {
    [today.year() - 1, today.year(), today.year() + 1]
        .into_iter()
        .filter_map(|year| NaiveDate::from_ymd_opt(year, month, day))
        .min_by_key(|date| (*date - today).num_days().abs())
        .map(|date| StringDate::new(date).to_string())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Misc line predicates ──────────────────────────────────────────────────────

/// First integer in the text. `"3 пара"` → `Some(3)`
pub fn parse_lesson_number(text: &str) -> Option<usize> {
    let text = clean_text(text)?;
    NUMBER_RE.captures(&text)?.get(1)?.as_str().parse().ok()
}

/// Lesson number in `1..=MAX_LESSON_NUMBER`; `Err` carries an out-of-range number.
/// `"2 пара"` → `Ok(Some(2))` | `"Тел. 2000000"` → `Err(2000000)`
pub fn parse_slot_number(text: &str) -> Result<Option<usize>, usize> {
    match parse_lesson_number(text) {
        Some(0) | None => Ok(None),
        Some(n) if n <= MAX_LESSON_NUMBER => Ok(Some(n)),
        Some(n) => Err(n),
    }
}

/// `Surname I.O.` / `Surname I. O.` / `Surname I.`
pub fn is_teacher_line(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && TEACHER_LINE_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 3).unwrap()
    }

    fn lines_of(html: &str) -> Vec<String> {
        let doc = Html::parse_fragment(&format!("<table><tr>{html}</tr></table>"));
        let sel = Selector::parse("td").unwrap();
        extract_lines(doc.select(&sel).next())
    }

    #[test]
    fn test_extract_lines_splits_on_br_and_blocks() {
        let lines = lines_of(
            "<td>1. Математика <br> (лк)<p>Иванов&nbsp; И.И.</p><div><span>Петров</span> П.П.</div>  </td>",
        );
        assert_eq!(lines, vec!["1. Математика", "(лк)", "Иванов И.И.", "Петров П.П."]);
    }

    #[test]
    fn test_extract_lines_empty_cell() {
        assert!(lines_of("<td> <br> </td>").is_empty());
        assert!(extract_lines(None).is_empty());
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date("1.9.25").as_deref(), Some("01.09.2025"));
        assert_eq!(normalize_date("01.09.2025").as_deref(), Some("01.09.2025"));
        assert_eq!(normalize_date("31.02.2025"), None);
        assert_eq!(normalize_date("01.09"), None);
    }

    #[test]
    fn test_parse_day_label() {
        let label = parse_day_label("  Понедельник,\n 01.09.2025 ", today()).unwrap();
        assert_eq!(label.date, "01.09.2025");
        assert_eq!(label.weekday.as_deref(), Some("Понедельник"));

        let label = parse_day_label("Monday 01.09", today()).unwrap();
        assert_eq!(label.date, "01.09.2025");
        assert_eq!(label.weekday, None);

        assert!(parse_day_label("№ пары", today()).is_none());
    }

    #[test]
    fn test_day_label_without_year_crosses_new_year() {
        let today = NaiveDate::from_ymd_opt(2025, 12, 30).unwrap();
        assert_eq!(parse_day_label("05.01", today).unwrap().date, "05.01.2026");
    }

    #[test]
    fn test_remove_dashes() {
        assert_eq!(remove_dashes("- -"), None);
        assert_eq!(remove_dashes("-"), None);
        assert_eq!(remove_dashes(" 215 ").as_deref(), Some("215"));
    }

    #[test]
    fn test_is_teacher_line() {
        assert!(is_teacher_line("Иванов И.И."));
        assert!(is_teacher_line("Петрова-сидорова А. Б."));
        assert!(is_teacher_line("Сидорова А."));
        assert!(!is_teacher_line("Математика"));
        assert!(!is_teacher_line(""));
    }

    #[test]
    fn test_parse_lesson_number() {
        assert_eq!(parse_lesson_number("3"), Some(3));
        assert_eq!(parse_lesson_number(" 2 пара "), Some(2));
        assert_eq!(parse_lesson_number("пара"), None);
        assert_eq!(parse_slot_number("0"), Ok(None));
        assert_eq!(parse_slot_number("16"), Ok(Some(16)));
        assert_eq!(parse_slot_number("Тел. 2000000"), Err(2_000_000));
        assert_eq!(parse_slot_number("88001234567"), Err(88_001_234_567));
    }
}
