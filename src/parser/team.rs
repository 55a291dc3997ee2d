//! Staff roster pages: full names keyed by `Surname I. O.`.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::warn;

use super::sha256_hex;
use super::text::{clean_text, element_text};

static CARD_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".entry.employees-list .employee-card").expect("CARD_SEL: hardcoded selector is valid")
});

static CARD_TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h5.employee-card-title").expect("CARD_TITLE_SEL: hardcoded selector is valid")
});

static ITEM_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".main.container #main-p > div.item").expect("ITEM_SEL: hardcoded selector is valid")
});

static ITEM_NAME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".content h3").expect("ITEM_NAME_SEL: hardcoded selector is valid"));

static CONTAINER_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [".entry.employees-list", ".main.container #main-p", ".common-page-left-block", "body"]
        .iter()
        .map(|s| Selector::parse(s).expect("CONTAINER_SELS: hardcoded selector is valid"))
        .collect()
});

static FULL_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(\S)\S*\s+(\S)\S*").expect("FULL_NAME_RE: hardcoded regex is valid")
});

/// `Иванов Иван Иванович` → `Иванов И. И.`
pub fn short_name(full_name: &str) -> Option<String> {
    let caps = FULL_NAME_RE.captures(full_name.trim())?;
    Some(format!("{} {}. {}.", &caps[1], &caps[2], &caps[3]))
}

/// Hash of the roster container, so unchanged pages are skipped.
pub fn team_hash(doc: &Html) -> String {
    let content = CONTAINER_SELS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(|el| el.inner_html())
        .unwrap_or_default();
    sha256_hex(&content)
}

fn names_from<'a>(elements: impl Iterator<Item = ElementRef<'a>>, name_sel: &Selector) -> BTreeMap<String, String> {
    let mut names = BTreeMap::new();

    for element in elements {
        let Some(full_name) = element
            .select(name_sel)
            .next()
            .and_then(|el| clean_text(&element_text(el)))
        else {
            continue;
        };

        match short_name(&full_name) {
            Some(short) => {
                names.insert(short, full_name);
            }
            None => warn!(name = %full_name, "cannot derive short name"),
        }
    }

    names
}

/// Employee cards when the page has them, else the older item list.
pub fn parse_team(doc: &Html) -> BTreeMap<String, String> {
    let mut cards = doc.select(&CARD_SEL).peekable();
    if cards.peek().is_some() {
        return names_from(cards, &CARD_TITLE_SEL);
    }

    names_from(doc.select(&ITEM_SEL), &ITEM_NAME_SEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("Иванов Иван Иванович").as_deref(), Some("Иванов И. И."));
        assert_eq!(short_name("  Петрова Анна Сергеевна ").as_deref(), Some("Петрова А. С."));
        assert_eq!(short_name("Директор"), None);
    }

    #[test]
    fn test_parse_employee_cards() {
        let doc = Html::parse_document(
            r#"<div class="entry employees-list">
                <div class="employee-card"><h5 class="employee-card-title"> Иванов Иван Иванович </h5></div>
                <div class="employee-card"><h5 class="employee-card-title">Сидорова Мария Петровна</h5></div>
                <div class="employee-card"><p>без имени</p></div>
            </div>"#,
        );

        let names = parse_team(&doc);
        assert_eq!(names.len(), 2);
        assert_eq!(names["Сидорова М. П."], "Сидорова Мария Петровна");
    }

    #[test]
    fn test_parse_item_list() {
        let doc = Html::parse_document(
            r#"<div class="main container"><div id="main-p">
                <div class="item"><div class="content"><h3>Козлов Кирилл Андреевич</h3></div></div>
            </div></div>"#,
        );

        let names = parse_team(&doc);
        assert_eq!(names["Козлов К. А."], "Козлов Кирилл Андреевич");
        assert_eq!(team_hash(&doc).len(), 64);
    }
}
