//! Day-level merge/diff of freshly parsed days against cached ones.

use std::collections::{HashMap, HashSet};

use crate::calendar::{DayIndex, WeekIndex};
use crate::models::{Day, EntityMap};

#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult<L> {
    /// Union of new and cached days, ascending by date.
    pub merged_days: Vec<Day<L>>,
    pub added: Vec<Day<L>>,
    pub changed: Vec<Day<L>>,
}

fn sort_days<L>(days: &mut [Day<L>]) {
    days.sort_by_key(|day| day.day_index().ok());
}

/// Merge `new_days` into `cached`. New values win for changed dates; cached
/// dates absent from `new_days` are kept for the caller's pruning step.
pub fn merge_days<L: Clone + PartialEq>(new_days: Vec<Day<L>>, cached: Vec<Day<L>>) -> DiffResult<L> {
    let mut cached_by_date: HashMap<String, Day<L>> = HashMap::with_capacity(cached.len());
    for day in cached {
        cached_by_date.entry(day.date.clone()).or_insert(day);
    }

    let mut merged_days = Vec::new();
    let mut added = Vec::new();
    let mut changed = Vec::new();
    let mut seen = HashSet::new();

    for day in new_days {
        if !seen.insert(day.date.clone()) {
            continue;
        }

        match cached_by_date.remove(&day.date) {
            None => {
                added.push(day.clone());
                merged_days.push(day);
            }
            Some(old) if old.lessons != day.lessons => {
                changed.push(day.clone());
                merged_days.push(day);
            }
            Some(old) => merged_days.push(old),
        }
    }

    merged_days.extend(cached_by_date.into_values());
    sort_days(&mut merged_days);

    DiffResult {
        merged_days,
        added,
        changed,
    }
}

// ── Pruning ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct PrunePolicy {
    pub today: DayIndex,
    /// Earliest day present in the newest parse.
    pub site_min_day: Option<DayIndex>,
    /// Set when the site currently shows no days of this week.
    pub preserve_week: Option<WeekIndex>,
}

impl PrunePolicy {
    fn keeps(&self, day: DayIndex) -> bool {
        self.preserve_week.is_some_and(|week| week.contains(day))
            || day.is_not_past(self.today)
            || self.site_min_day.is_some_and(|min| day >= min)
    }
}

/// Drop stale days in place and return them for archiving.
pub fn prune_days<L>(days: &mut Vec<Day<L>>, policy: &PrunePolicy) -> Vec<Day<L>> {
    let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(days)
        .into_iter()
        .partition(|day| day.day_index().map(|index| policy.keeps(index)).unwrap_or(true));

    *days = kept;
    removed
}

/// Minimum day index across every entity of a parse.
pub fn site_min_day<L>(entities: &EntityMap<L>) -> Option<DayIndex> {
    entities
        .values()
        .flat_map(|entity| entity.days.iter())
        .filter_map(|day| day.day_index().ok())
        .min()
}

/// Maximum week index across every entity.
pub fn max_week<L>(entities: &EntityMap<L>) -> Option<WeekIndex> {
    entities
        .values()
        .flat_map(|entity| entity.days.iter())
        .filter_map(|day| day.week_index().ok())
        .max()
}

pub fn has_days_in_week<L>(entities: &EntityMap<L>, week: WeekIndex) -> bool {
    entities
        .values()
        .flat_map(|entity| entity.days.iter())
        .filter_map(|day| day.day_index().ok())
        .any(|index| week.contains(index))
}

// ── Event classification ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayEventKind {
    Add,
    Update,
}

/// Per-day notification for an added or changed day.
///
/// Today's changes are updates; tomorrow's are additions until a notice for
/// that date was sent. Other dates only surface through the week signal.
pub fn classify_day_event(
    day: DayIndex,
    changed: bool,
    last_noticed_day: Option<DayIndex>,
    today: DayIndex,
) -> Option<DayEventKind> {
    if changed && day.is_today(today) {
        return Some(DayEventKind::Update);
    }

    if day.is_tomorrow(today) {
        return Some(if last_noticed_day == Some(day) {
            DayEventKind::Update
        } else {
            DayEventKind::Add
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn day(date: &str, lessons: &[u8]) -> Day<u8> {
        Day {
            date: date.to_string(),
            lessons: lessons.iter().map(|&l| Some(l)).collect(),
        }
    }

    fn dates(days: &[Day<u8>]) -> Vec<&str> {
        days.iter().map(|d| d.date.as_str()).collect()
    }

    #[test]
    fn test_merge_classifies_added_changed_unchanged() {
        let cached = vec![day("02.09.2025", &[1]), day("01.09.2025", &[1, 2]), day("03.09.2025", &[5])];
        let new = vec![day("01.09.2025", &[1, 2]), day("02.09.2025", &[9]), day("04.09.2025", &[3])];

        let result = merge_days(new, cached);

        assert_eq!(dates(&result.added), ["04.09.2025"]);
        assert_eq!(dates(&result.changed), ["02.09.2025"]);
        assert_eq!(
            dates(&result.merged_days),
            ["01.09.2025", "02.09.2025", "03.09.2025", "04.09.2025"]
        );
        assert_eq!(result.merged_days[1].lessons, vec![Some(9)]);
    }

    #[test]
    fn test_merge_sorts_by_calendar_not_text() {
        let result = merge_days(vec![day("01.10.2025", &[1])], vec![day("30.09.2025", &[1])]);
        assert_eq!(dates(&result.merged_days), ["30.09.2025", "01.10.2025"]);
    }

    #[test]
    fn test_merge_properties_over_overlaps() {
        let all = ["01.09.2025", "02.09.2025", "03.09.2025", "04.09.2025"];

        // Every split of four dates into cached-only, new-only, both-same, both-different.
        for mask in 0..4u32.pow(4) {
            let mut cached = Vec::new();
            let mut new = Vec::new();
            let mut expect_added = BTreeSet::new();
            let mut expect_changed = BTreeSet::new();

            for (i, date) in all.iter().enumerate() {
                match (mask / 4u32.pow(i as u32)) % 4 {
                    0 => cached.push(day(date, &[1])),
                    1 => {
                        new.push(day(date, &[1]));
                        expect_added.insert(*date);
                    }
                    2 => {
                        cached.push(day(date, &[1]));
                        new.push(day(date, &[1]));
                    }
                    _ => {
                        cached.push(day(date, &[1]));
                        new.push(day(date, &[2]));
                        expect_changed.insert(*date);
                    }
                }
            }

            let new_copy = new.clone();
            let result = merge_days(new, cached);

            assert_eq!(dates(&result.merged_days), all, "mask {mask}");
            assert_eq!(dates(&result.added).into_iter().collect::<BTreeSet<_>>(), expect_added);
            assert_eq!(dates(&result.changed).into_iter().collect::<BTreeSet<_>>(), expect_changed);

            for merged in &result.merged_days {
                if let Some(fresh) = new_copy.iter().find(|d| d.date == merged.date) {
                    assert_eq!(merged.lessons, fresh.lessons);
                }
            }
        }
    }

    fn index(date: &str) -> DayIndex {
        DayIndex::from_string_date(date).unwrap()
    }

    #[test]
    fn test_prune_keeps_future_site_range_and_preserved_week() {
        let mut days = vec![
            day("25.08.2025", &[1]),
            day("01.09.2025", &[1]),
            day("03.09.2025", &[1]),
            day("05.09.2025", &[1]),
        ];
        let today = index("05.09.2025");

        let policy = PrunePolicy {
            today,
            site_min_day: Some(index("03.09.2025")),
            preserve_week: None,
        };
        let removed = prune_days(&mut days, &policy);
        assert_eq!(dates(&removed), ["25.08.2025", "01.09.2025"]);
        assert_eq!(dates(&days), ["03.09.2025", "05.09.2025"]);

        let mut days = vec![day("25.08.2025", &[1]), day("01.09.2025", &[1])];
        let policy = PrunePolicy {
            today,
            site_min_day: None,
            preserve_week: Some(WeekIndex::from_date(NaiveDate::from_ymd_opt(2025, 9, 5).unwrap())),
        };
        let removed = prune_days(&mut days, &policy);
        assert_eq!(dates(&removed), ["25.08.2025"]);
        assert_eq!(dates(&days), ["01.09.2025"]);
    }

    #[test]
    fn test_classify_day_event() {
        let today = index("02.09.2025");
        let tomorrow = today.offset(1);

        assert_eq!(classify_day_event(today, true, None, today), Some(DayEventKind::Update));
        assert_eq!(classify_day_event(today, false, None, today), None);
        assert_eq!(classify_day_event(tomorrow, false, None, today), Some(DayEventKind::Add));
        assert_eq!(classify_day_event(tomorrow, true, Some(today), today), Some(DayEventKind::Add));
        assert_eq!(
            classify_day_event(tomorrow, true, Some(tomorrow), today),
            Some(DayEventKind::Update)
        );
        assert_eq!(classify_day_event(today.offset(2), true, None, today), None);
    }
}
