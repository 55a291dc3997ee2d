//! Structural sanity checks on a sample of parsed entities.

use rand::seq::SliceRandom;
use std::collections::HashSet;

use crate::calendar::StringDate;
use crate::models::{Entity, EntityMap, LessonSlot};

#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub max_lessons_per_day: usize,
    /// `0` checks every entity.
    pub sample_size: usize,
}

fn has_lessons<L>(entity: &Entity<L>) -> bool {
    entity.days.iter().any(|day| !day.lessons.is_empty())
}

/// Up to `size` entities, drawn from the ones with lessons when there are any.
fn pick_sample<'a, L>(entities: &'a EntityMap<L>, size: usize) -> Vec<&'a Entity<L>> {
    let all: Vec<&Entity<L>> = entities.values().collect();
    if size == 0 || all.len() <= size {
        return all;
    }

    let with_lessons: Vec<&Entity<L>> = all.iter().copied().filter(|e| has_lessons(e)).collect();
    let mut pool = if with_lessons.is_empty() { all } else { with_lessons };

    pool.shuffle(&mut rand::rng());
    pool.truncate(size);
    pool
}

fn validate_entity<L>(entity: &Entity<L>, max_lessons_per_day: usize) -> Vec<String> {
    if entity.days.is_empty() {
        return vec!["no days".to_string()];
    }

    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for day in &entity.days {
        if day.date.is_empty() {
            errors.push("empty day".to_string());
            continue;
        }
        if !seen.insert(day.date.as_str()) {
            errors.push(format!("duplicate day {}", day.date));
        }
        if day.date.parse::<StringDate>().is_err() {
            errors.push(format!("invalid date {}", day.date));
        }
        if day.lessons.len() > max_lessons_per_day {
            errors.push(format!("too many lessons {}", day.date));
        }
    }

    errors
}

/// `Ok` when the sampled entities look like a real timetable; otherwise one
/// message per failing entity plus `no lessons in sample`.
pub fn validate_entities<L: LessonSlot>(entities: &EntityMap<L>, limits: &ValidationLimits) -> Result<(), Vec<String>> {
    if entities.is_empty() {
        return Err(vec![format!("empty {}", L::AUDIENCE.file_stem())]);
    }

    let mut errors = Vec::new();
    let mut any_lessons = false;

    for entity in pick_sample(entities, limits.sample_size) {
        let entity_errors = validate_entity(entity, limits.max_lessons_per_day);
        if !entity_errors.is_empty() {
            errors.push(format!("{}: {}", entity.key, entity_errors.join(", ")));
        }
        any_lessons |= has_lessons(entity);
    }

    if !any_lessons {
        errors.push("no lessons in sample".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Day, GroupEntry, GroupLesson};

    fn lesson() -> Option<GroupLesson> {
        Some(GroupLesson::Single(GroupEntry::new("Математика")))
    }

    fn entity(key: &str, days: Vec<Day<GroupLesson>>) -> Entity<GroupLesson> {
        Entity::new(key, days)
    }

    fn limits(sample_size: usize) -> ValidationLimits {
        ValidationLimits {
            max_lessons_per_day: 3,
            sample_size,
        }
    }

    #[test]
    fn test_valid_timetable_passes() {
        let mut map = EntityMap::new();
        map.insert(
            "51".into(),
            entity("51", vec![Day { date: "01.09.2025".into(), lessons: vec![lesson()] }]),
        );
        assert_eq!(validate_entities(&map, &limits(10)), Ok(()));
    }

    #[test]
    fn test_each_rule_reports() {
        let mut map = EntityMap::new();
        map.insert("empty".into(), entity("empty", vec![]));
        map.insert(
            "bad".into(),
            entity(
                "bad",
                vec![
                    Day { date: "01.09.2025".into(), lessons: vec![lesson(); 4] },
                    Day::new("01.09.2025"),
                    Day::new("31.02.2025"),
                ],
            ),
        );

        let errors = validate_entities(&map, &limits(0)).unwrap_err();
        assert!(errors.contains(&"empty: no days".to_string()));
        let bad = errors.iter().find(|e| e.starts_with("bad:")).unwrap();
        assert!(bad.contains("too many lessons 01.09.2025"));
        assert!(bad.contains("duplicate day 01.09.2025"));
        assert!(bad.contains("invalid date 31.02.2025"));
    }

    #[test]
    fn test_no_lessons_and_empty_map() {
        let mut map = EntityMap::new();
        map.insert("51".into(), entity("51", vec![Day::new("01.09.2025")]));
        assert_eq!(
            validate_entities(&map, &limits(10)),
            Err(vec!["no lessons in sample".to_string()])
        );

        let empty: EntityMap<GroupLesson> = EntityMap::new();
        assert_eq!(validate_entities(&empty, &limits(10)), Err(vec!["empty groups".to_string()]));
    }

    #[test]
    fn test_sample_prefers_entities_with_lessons() {
        let mut map = EntityMap::new();
        for i in 0..20 {
            let key = format!("g{i:02}");
            let lessons = if i == 7 { vec![lesson()] } else { vec![] };
            map.insert(key.clone(), entity(&key, vec![Day { date: "01.09.2025".into(), lessons }]));
        }

        for _ in 0..5 {
            assert_eq!(validate_entities(&map, &limits(1)), Ok(()));
        }
    }
}
