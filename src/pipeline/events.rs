//! Typed per-cycle output handed to notifier collaborators.

use serde::Serialize;

use crate::error::FailureReport;
use crate::merge::DayEventKind;
use crate::models::{ArchivedDay, DayEvent, EntityMap, EntryCache, GroupLesson, TeacherLesson, WeekEvent};
use crate::parser::Timetable;
use crate::parser::legacy::LegacySlot;
use crate::storage::Caches;

/// Everything one cycle wants to tell the outside world, one list per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub add_group_day: Vec<DayEvent<GroupLesson>>,
    pub update_group_day: Vec<DayEvent<GroupLesson>>,
    pub add_teacher_day: Vec<DayEvent<TeacherLesson>>,
    pub update_teacher_day: Vec<DayEvent<TeacherLesson>>,
    pub update_week: Vec<WeekEvent>,
    pub error: Vec<FailureReport>,
    pub flush_cache: Vec<ArchivedDay>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.add_group_day.len()
            + self.update_group_day.len()
            + self.add_teacher_day.len()
            + self.update_teacher_day.len()
            + self.update_week.len()
            + self.error.len()
            + self.flush_cache.len()
    }
}

/// Ties a lesson family to its cache slot and event lists.
pub trait Family: LegacySlot {
    fn from_timetable(timetable: Timetable) -> Option<EntityMap<Self>>;

    fn cache(caches: &Caches) -> &EntryCache<Self>;

    fn cache_mut(caches: &mut Caches) -> &mut EntryCache<Self>;

    fn day_events(batch: &mut EventBatch, kind: DayEventKind) -> &mut Vec<DayEvent<Self>>;
}

impl Family for GroupLesson {
    fn from_timetable(timetable: Timetable) -> Option<EntityMap<Self>> {
        match timetable {
            Timetable::Groups(map) => Some(map),
            Timetable::Teachers(_) => None,
        }
    }

    fn cache(caches: &Caches) -> &EntryCache<Self> {
        &caches.groups
    }

    fn cache_mut(caches: &mut Caches) -> &mut EntryCache<Self> {
        &mut caches.groups
    }

    fn day_events(batch: &mut EventBatch, kind: DayEventKind) -> &mut Vec<DayEvent<Self>> {
        match kind {
            DayEventKind::Add => &mut batch.add_group_day,
            DayEventKind::Update => &mut batch.update_group_day,
        }
    }
}

impl Family for TeacherLesson {
    fn from_timetable(timetable: Timetable) -> Option<EntityMap<Self>> {
        match timetable {
            Timetable::Teachers(map) => Some(map),
            Timetable::Groups(_) => None,
        }
    }

    fn cache(caches: &Caches) -> &EntryCache<Self> {
        &caches.teachers
    }

    fn cache_mut(caches: &mut Caches) -> &mut EntryCache<Self> {
        &mut caches.teachers
    }

    fn day_events(batch: &mut EventBatch, kind: DayEventKind) -> &mut Vec<DayEvent<Self>> {
        match kind {
            DayEventKind::Add => &mut batch.add_teacher_day,
            DayEventKind::Update => &mut batch.update_teacher_day,
        }
    }
}
