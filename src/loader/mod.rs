//! Local mode: entities read from JSON cache snapshots instead of pages.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{ParserContext, TimetableError};
use crate::models::{EntityMap, EntryCache, LessonSlot, TeamCache};

fn read_snapshot(path: &Path) -> Result<String, TimetableError> {
    std::fs::read_to_string(path).map_err(|e| {
        TimetableError::from(e).with_context(ParserContext {
            url: Some(path.display().to_string()),
            ..ParserContext::stage("local")
        })
    })
}

/// Entities of a family snapshot (`timetable` or `entities` field).
pub fn load_entities<L: LessonSlot>(path: &Path) -> Result<EntityMap<L>, TimetableError> {
    let cache: EntryCache<L> = serde_json::from_str(&read_snapshot(path)?)?;
    debug!(path = %path.display(), entities = cache.entities.len(), "local snapshot loaded");
    Ok(cache.entities)
}

pub fn load_team(path: &Path) -> Result<BTreeMap<String, String>, TimetableError> {
    let team: TeamCache = serde_json::from_str(&read_snapshot(path)?)?;
    Ok(team.names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TeacherLesson;
    use crate::storage::temp_dir;

    #[test]
    fn test_reads_timetable_field() {
        let dir = temp_dir("loader");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("teachers.json");
        std::fs::write(
            &path,
            r#"{"timetable": {"Иванов И. И.": {"key": "Иванов И. И.", "days": [
                {"date": "01.09.2025", "lessons": [null, {"subject": "Физика", "type": "лк", "group": "51"}]}
            ]}}, "contentHash": "x"}"#,
        )
        .unwrap();

        let entities = load_entities::<TeacherLesson>(&path).unwrap();
        let day = &entities["Иванов И. И."].days[0];
        assert_eq!(day.lesson_count(), 1);

        let err = load_team(&dir.join("team.json")).unwrap_err();
        assert_eq!(err.context().map(|c| c.stage.as_str()), Some("local"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
