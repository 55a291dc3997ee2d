//! Day-level comparison of two parses of one page, for the diff log.
//!
//! The v1 parser keeps every week it finds, so days of `previous` outside the
//! weeks of `current` are left out of the comparison.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::calendar::WeekIndex;
use crate::models::{Day, EntityMap};

fn entity_lines<L: PartialEq>(key: &str, current: &[Day<L>], previous: &[&Day<L>], out: &mut Vec<String>) {
    let mut old: HashMap<&str, &Day<L>> = previous.iter().map(|d| (d.date.as_str(), *d)).collect();

    for day in current {
        match old.remove(day.date.as_str()) {
            None => out.push(format!("{key}: added {}", day.date)),
            Some(before) if before.lessons != day.lessons => out.push(format!("{key}: updated {}", day.date)),
            Some(_) => {}
        }
    }

    // Keep the removed lines in calendar order.
    for day in previous.iter().filter(|d| old.contains_key(d.date.as_str())) {
        out.push(format!("{key}: removed {}", day.date));
    }
}

fn weeks_of<L>(entities: &EntityMap<L>) -> HashSet<WeekIndex> {
    entities
        .values()
        .flat_map(|entity| &entity.days)
        .filter_map(|day| day.week_index().ok())
        .collect()
}

/// At most `limit` lines describing how `current` differs from `previous`.
pub fn diff_entities<L: PartialEq>(current: &EntityMap<L>, previous: &EntityMap<L>, limit: usize) -> Vec<String> {
    let keys: BTreeSet<&String> = current.keys().chain(previous.keys()).collect();
    let weeks = weeks_of(current);
    let in_scope = |day: &Day<L>| weeks.is_empty() || day.week_index().is_ok_and(|week| weeks.contains(&week));
    let mut out = Vec::new();

    for key in keys {
        let now = current.get(key).map(|e| e.days.as_slice()).unwrap_or_default();
        let before: Vec<&Day<L>> = previous
            .get(key)
            .map(|e| e.days.iter().filter(|day| in_scope(*day)).collect())
            .unwrap_or_default();
        entity_lines(key, now, &before, &mut out);

        if out.len() >= limit {
            out.truncate(limit);
            break;
        }
    }

    out
}
