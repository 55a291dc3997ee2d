//! Pipeline orchestrator: ties source → parser → merge → storage together.
//!
//! ## One cycle
//!
//! 1. Fetch the group and teacher pages (concurrently unless `sync_mode`),
//!    plus the team pages when they are due. The whole step is bounded by
//!    `cycle_timeout_secs`.
//! 2. Per page: structure check, content hash short-circuit, primary parse,
//!    fallback parse, optional strict validation, diff log and quarantine.
//! 3. Merge accepted entities into the cache, classify per-day events, prune
//!    stale days into a `flushCache` batch and check for a new week.
//! 4. Record the result in the health log and save the cache.
//!
//! `run_loop()` repeats cycles forever, sleeping between them; a
//! [`ParseTrigger`] wakes it early.

pub mod events;
pub mod health;

use anyhow::{Context, Result};
use scraper::Html;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

use crate::calendar::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::error::{FailureReport, ParserContext, TimetableError};
use crate::loader;
use crate::merge::{
    DiffResult, PrunePolicy, classify_day_event, has_days_in_week, max_week, merge_days, prune_days, site_min_day,
};
use crate::models::{Audience, DayEvent, EntityMap, GroupLesson, TeacherLesson, WeekEvent, total_lessons};
use crate::parser::table::filter_entity_weeks;
use crate::parser::team::{parse_team, team_hash};
use crate::parser::{ParseOptions, ParserKind, StructureReport, Timetable, WeekPolicy, content_container, content_hash};
use crate::scraper::{TimetableSource, build_source};
use crate::storage::{CacheStore, Caches, MetricsWriter, ParseMetrics, SnapshotKind, SnapshotStore};
use crate::utils::{Timer, poll_delay};

pub use events::{EventBatch, Family};
pub use health::{CycleResult, HealthEntry, HealthLog};

// ── Trigger ───────────────────────────────────────────────────────────────────

/// Handle for requesting an early, hash-ignoring cycle.
#[derive(Debug, Default)]
pub struct ParseTrigger {
    notify: Notify,
    force: AtomicBool,
    clear_keys: AtomicBool,
}

impl ParseTrigger {
    /// Wake the poll loop. With `clear_keys`, cached entities missing from
    /// the next parse are dropped.
    pub fn force_parse(&self, clear_keys: bool) {
        self.force.store(true, Ordering::SeqCst);
        if clear_keys {
            self.clear_keys.store(true, Ordering::SeqCst);
        }
        self.notify.notify_one();
    }

    fn take(&self) -> CycleRequest {
        CycleRequest {
            force: self.force.swap(false, Ordering::SeqCst),
            clear_keys: self.clear_keys.swap(false, Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CycleRequest {
    force: bool,
    clear_keys: bool,
}

// ── Page outcomes ─────────────────────────────────────────────────────────────

enum PageOutcome<L> {
    /// Same content hash as the cache.
    Unchanged,
    Quarantined(FailureReport),
    Parsed(ParsedPage<L>),
}

struct ParsedPage<L> {
    entities: EntityMap<L>,
    /// `None` in local mode.
    hash: Option<String>,
}

enum TeamPage {
    Unchanged,
    Parsed {
        index: usize,
        hash: Option<String>,
        names: BTreeMap<String, String>,
    },
}

type PageResult<L> = Result<PageOutcome<L>, TimetableError>;

#[derive(Debug)]
pub struct CycleReport {
    pub events: EventBatch,
    pub failure: Option<FailureReport>,
    pub took: Duration,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: AppConfig,
    source: Arc<dyn TimetableSource>,
    clock: Arc<dyn Clock>,
    store: CacheStore,
    caches: Caches,
    snapshots: Option<SnapshotStore>,
    metrics: Option<MetricsWriter>,
    health: HealthLog,
    trigger: Arc<ParseTrigger>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn TimetableSource>,
        clock: Arc<dyn Clock>,
        store: CacheStore,
        caches: Caches,
    ) -> Self {
        let v2 = &config.parser.v2;
        let snapshots = v2.raw_html.enabled.then(|| SnapshotStore::new(&v2.raw_html));
        let metrics = v2.metrics.enabled.then(|| MetricsWriter::new(&v2.metrics.dir));

        Self {
            config,
            source,
            clock,
            store,
            caches,
            snapshots,
            metrics,
            health: HealthLog::default(),
            trigger: Arc::new(ParseTrigger::default()),
        }
    }

    /// Production wiring: HTTP (or replay) source, system clock, on-disk cache.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let source = build_source(&config.parser).context("Failed to build page source")?;
        let store = CacheStore::new(&config.storage.cache_dir);
        let caches = store.load_all().context("Failed to load cache")?;
        Ok(Self::new(config, source, Arc::new(SystemClock), store, caches))
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub fn health(&self) -> &HealthLog {
        &self.health
    }

    pub fn trigger(&self) -> Arc<ParseTrigger> {
        Arc::clone(&self.trigger)
    }

    /// A `flushCache` batch with every cached day.
    pub fn flush_all(&self) -> EventBatch {
        EventBatch {
            flush_cache: self.caches.archive_all(),
            ..Default::default()
        }
    }

    /// Poll until the event receiver goes away.
    pub async fn run_loop(&mut self, events: mpsc::Sender<EventBatch>) {
        if !self.config.parser.enabled {
            info!("parser disabled, poll loop not started");
            return;
        }

        loop {
            let report = self.run_cycle().await;

            if !report.events.is_empty() && events.send(report.events).await.is_err() {
                info!("event receiver closed, stopping poll loop");
                return;
            }

            let delay = poll_delay(&self.config.parser, self.clock.as_ref(), report.failure.is_some());
            debug!(secs = delay.as_secs(), "next cycle scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.trigger.notify.notified() => info!("forced parse requested"),
            }
        }
    }

    /// Run one cycle, record its health and save the cache.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let request = self.trigger.take();
        let timer = Timer::start("parse cycle");
        let mut events = EventBatch::default();

        let result = self.cycle(request, &mut events).await;
        let now = self.clock.timestamp();
        self.caches.success_update = result.is_ok();

        let failure = match result {
            Ok(took) => {
                info!(ms = took.as_millis() as u64, events = events.len(), "cycle succeeded");
                self.health.record_success(now, took);
                None
            }
            Err(e) => {
                error!(error = %e, context = ?e.context(), "cycle failed");
                let report = e.report();
                if let Some(escalated) = self.health.record_failure(now, report.clone()) {
                    events.error.push(escalated);
                }
                Some(report)
            }
        };

        if let Err(e) = self.store.save_all(&self.caches) {
            error!(error = %format!("{e:#}"), "failed to save cache");
        }

        CycleReport {
            events,
            failure,
            took: timer.elapsed(),
        }
    }

    async fn cycle(&mut self, request: CycleRequest, events: &mut EventBatch) -> Result<Duration, TimetableError> {
        let started = Instant::now();
        let team_due = self.team_due(request);
        let limit = Duration::from_secs(self.config.parser.cycle_timeout_secs);

        let (groups, teachers, team) = tokio::time::timeout(limit, self.load_all(request, team_due))
            .await
            .map_err(|_| TimetableError::Timeout)?;

        let mut first_error = None;
        let groups_ok = self.settle::<GroupLesson>(groups, request.clear_keys, events, &mut first_error);
        let teachers_ok = self.settle::<TeacherLesson>(teachers, request.clear_keys, events, &mut first_error);

        match team {
            Some(Ok(pages)) => self.apply_team(pages, request.clear_keys),
            Some(Err(e)) => {
                warn!(error = %e, "team parse failed");
                first_error.get_or_insert(e);
            }
            None => {}
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if !groups_ok || !teachers_ok {
            return Err(TimetableError::EmptyTimetable {
                groups: groups_ok,
                teachers: teachers_ok,
            });
        }

        Ok(started.elapsed())
    }

    async fn load_all(
        &self,
        request: CycleRequest,
        team_due: bool,
    ) -> (
        PageResult<GroupLesson>,
        PageResult<TeacherLesson>,
        Option<Result<Vec<TeamPage>, TimetableError>>,
    ) {
        let endpoints = &self.config.parser.endpoints;
        let groups = self.load_page::<GroupLesson>(&endpoints.timetable_group, request);
        let teachers = self.load_page::<TeacherLesson>(&endpoints.timetable_teacher, request);
        let team = async {
            if team_due {
                Some(self.load_team_pages(request).await)
            } else {
                None
            }
        };

        if self.config.parser.sync_mode {
            (groups.await, teachers.await, team.await)
        } else {
            tokio::join!(groups, teachers, team)
        }
    }

    // ── Fetch & parse ─────────────────────────────────────────────────────────

    async fn load_page<L: Family>(&self, url: &str, request: CycleRequest) -> PageResult<L> {
        if self.config.parser.local_mode {
            let entities = loader::load_entities::<L>(&self.store.entries_path(L::AUDIENCE))?;
            return Ok(PageOutcome::Parsed(ParsedPage { entities, hash: None }));
        }

        let html = self.source.fetch(url).await.map_err(|e| {
            e.with_context(ParserContext {
                url: Some(url.to_string()),
                ..ParserContext::stage("fetch")
            })
        })?;

        self.parse_page::<L>(url, &html, request)
    }

    fn parse_page<L: Family>(&self, url: &str, html: &str, request: CycleRequest) -> PageResult<L> {
        let started = Instant::now();
        let v2 = &self.config.parser.v2;
        let primary = ParserKind::for_audience(L::AUDIENCE, v2.enabled);
        let mut context = ParserContext {
            url: Some(url.to_string()),
            parser: Some(primary.name().to_string()),
            ..ParserContext::stage("content")
        };

        let doc = Html::parse_document(html);
        let container = content_container(&doc).map_err(|e| e.with_context(context.clone()))?;

        let structure = StructureReport::of(container);
        if structure.is_suspicious() {
            error!(
                url,
                tables = structure.tables,
                h2 = structure.h2,
                h3 = structure.h3,
                "structure check failed"
            );
        }

        let hash = content_hash(container, v2.hash_mode);
        if !self.config.parser.ignore_hash && !request.force && hash == L::cache(&self.caches).content_hash {
            debug!(audience = L::AUDIENCE.name(), "page unchanged");
            return Ok(PageOutcome::Unchanged);
        }
        info!(audience = L::AUDIENCE.name(), hash = %hash, "parsing page");
        context.hash = Some(hash);

        let result = self.parse_document::<L>(&doc, primary, &mut context);

        let kind = match &result {
            Ok(PageOutcome::Parsed(_)) => SnapshotKind::Good,
            _ => SnapshotKind::Bad,
        };
        self.snapshot(L::AUDIENCE, kind, html);

        if let Ok(PageOutcome::Parsed(page)) = &result {
            self.write_metrics(L::AUDIENCE, page, &context, started.elapsed());
        }

        result
    }

    fn parse_document<L: Family>(&self, doc: &Html, primary: ParserKind, context: &mut ParserContext) -> PageResult<L> {
        let parser = &self.config.parser;
        let v2 = &parser.v2;
        let opts = parser.parse_options(self.clock.today());
        let limits = parser.validation_limits();
        let fallback = (v2.enabled && v2.fallback_to_v1).then(|| primary.legacy());
        context.stage = "parse".into();

        let (mut timetable, mut used) = match (primary.parse(doc, &opts), fallback) {
            (Ok(timetable), _) if !timetable.is_empty() => (timetable, primary),
            (first, Some(fallback)) => {
                warn!(parser = %primary, fallback = %fallback, "primary parser found nothing, trying fallback");
                context.fallback_used = true;
                match (fallback.parse(doc, &opts), first) {
                    (Ok(timetable), _) => (timetable, fallback),
                    (Err(_), Ok(empty)) => (empty, primary),
                    (Err(_), Err(e)) => return Err(e.with_context(context.clone())),
                }
            }
            (Ok(timetable), None) => (timetable, primary),
            (Err(e), None) => return Err(e.with_context(context.clone())),
        };

        if primary.is_v2() && v2.strict {
            context.stage = "validate".into();
            if let Err(errors) = timetable.validate(&limits) {
                warn!(parser = %used, errors = ?errors, "validation failed");

                let recovered = fallback.filter(|fallback| *fallback != used).and_then(|fallback| {
                    context.fallback_used = true;
                    fallback
                        .parse(doc, &opts)
                        .ok()
                        .filter(|candidate| candidate.validate(&limits).is_ok())
                        .map(|candidate| (candidate, fallback))
                });

                match recovered {
                    Some((candidate, fallback)) => {
                        timetable = candidate;
                        used = fallback;
                    }
                    None => {
                        context.validation_errors = errors.clone();
                        return Err(TimetableError::Validation(errors).with_context(context.clone()));
                    }
                }
            }
        }
        context.parser = Some(used.name().to_string());

        if v2.diff_log && primary.is_v2() && used == primary {
            self.log_legacy_diff(doc, primary, &timetable, &opts);
        }

        let lessons = timetable.total_lessons();
        if v2.quarantine.enabled && primary.is_v2() && !timetable.is_empty() && lessons < v2.quarantine.min_lessons {
            context.stage = "quarantine".into();
            let err = TimetableError::Quarantine {
                lessons,
                min: v2.quarantine.min_lessons,
            }
            .with_context(context.clone());
            warn!(error = %err, "page quarantined");
            return Ok(PageOutcome::Quarantined(err.report()));
        }

        let entities = L::from_timetable(timetable).ok_or(TimetableError::NoTimetable)?;
        debug!(parser = %used, entities = entities.len(), lessons, "page parsed");

        Ok(PageOutcome::Parsed(ParsedPage {
            entities,
            hash: context.hash.clone(),
        }))
    }

    fn log_legacy_diff(&self, doc: &Html, primary: ParserKind, timetable: &Timetable, opts: &ParseOptions) {
        match primary.legacy().parse(doc, opts) {
            Ok(legacy) => {
                let lines = timetable.diff_lines(&legacy, self.config.parser.v2.diff_log_limit);
                if !lines.is_empty() {
                    info!(count = lines.len(), lines = ?lines, "v2 diff");
                }
            }
            Err(e) => debug!(error = %e, "legacy parser failed during diff"),
        }
    }

    fn snapshot(&self, audience: Audience, kind: SnapshotKind, html: &str) {
        let Some(store) = &self.snapshots else {
            return;
        };
        if let Err(e) = store.record(audience, kind, html, self.clock.now()) {
            warn!(error = %e, "failed to store snapshot");
        }
    }

    fn write_metrics<L>(&self, audience: Audience, page: &ParsedPage<L>, context: &ParserContext, took: Duration) {
        let Some(writer) = &self.metrics else {
            return;
        };
        let metrics = ParseMetrics {
            audience,
            parser: context.parser.clone().unwrap_or_default(),
            hash: page.hash.clone().unwrap_or_default(),
            fallback_used: context.fallback_used,
            entities: page.entities.len(),
            lessons: total_lessons(&page.entities),
            duration_ms: took.as_millis() as u64,
            at: self.clock.timestamp(),
        };
        if let Err(e) = writer.write(&metrics) {
            warn!(error = %e, "failed to write metrics");
        }
    }

    // ── Team ──────────────────────────────────────────────────────────────────

    fn team_due(&self, request: CycleRequest) -> bool {
        let parser = &self.config.parser;
        request.force
            || request.clear_keys
            || parser.local_mode
            || self.caches.team.update.is_none_or(|update| {
                (self.clock.timestamp() - update).num_seconds() >= parser.update_interval.teams as i64
            })
    }

    async fn load_team_pages(&self, request: CycleRequest) -> Result<Vec<TeamPage>, TimetableError> {
        if self.config.parser.local_mode {
            let names = loader::load_team(&self.store.team_path())?;
            return Ok(vec![TeamPage::Parsed {
                index: 0,
                hash: None,
                names,
            }]);
        }

        let mut pages = Vec::new();
        for (index, url) in self.config.parser.endpoints.team.iter().enumerate() {
            let html = self.source.fetch(url).await.map_err(|e| {
                e.with_context(ParserContext {
                    url: Some(url.clone()),
                    ..ParserContext::stage("team")
                })
            })?;
            pages.push(self.parse_team_page(index, &html, request));
        }
        Ok(pages)
    }

    fn parse_team_page(&self, index: usize, html: &str, request: CycleRequest) -> TeamPage {
        let doc = Html::parse_document(html);
        let hash = team_hash(&doc);

        let stored = self.caches.team.hash.get(index);
        if !self.config.parser.ignore_hash && !request.force && stored == Some(&hash) {
            return TeamPage::Unchanged;
        }

        TeamPage::Parsed {
            index,
            hash: Some(hash),
            names: parse_team(&doc),
        }
    }

    fn apply_team(&mut self, pages: Vec<TeamPage>, clear_keys: bool) {
        let now = self.clock.timestamp();
        let team = &mut self.caches.team;

        if clear_keys {
            let fresh: HashSet<String> = pages
                .iter()
                .filter_map(|page| match page {
                    TeamPage::Parsed { names, .. } => Some(names.keys().cloned()),
                    TeamPage::Unchanged => None,
                })
                .flatten()
                .collect();
            if !fresh.is_empty() {
                team.names.retain(|name, _| fresh.contains(name));
            }
        }

        for page in pages {
            let TeamPage::Parsed { index, hash, names } = page else {
                continue;
            };
            if let Some(hash) = hash {
                if team.hash.len() <= index {
                    team.hash.resize(index + 1, String::new());
                }
                if team.hash[index] != hash {
                    team.changed = Some(now);
                }
                team.hash[index] = hash;
            }
            if names.is_empty() {
                warn!(page = index, "team page has no names");
                continue;
            }
            info!(page = index, names = names.len(), "team page parsed");
            team.names.extend(names);
        }

        team.update = Some(now);
    }

    // ── Merge ─────────────────────────────────────────────────────────────────

    /// Apply one page's outcome; `false` when it produced no entities.
    fn settle<L: Family>(
        &mut self,
        result: PageResult<L>,
        clear_keys: bool,
        events: &mut EventBatch,
        first_error: &mut Option<TimetableError>,
    ) -> bool {
        let now = self.clock.timestamp();
        match result {
            Ok(PageOutcome::Unchanged) => {
                L::cache_mut(&mut self.caches).last_update = Some(now);
                true
            }
            Ok(PageOutcome::Quarantined(report)) => {
                events.error.push(report);
                true
            }
            Ok(PageOutcome::Parsed(page)) if page.entities.is_empty() => {
                warn!(audience = L::AUDIENCE.name(), "page has no entities");
                false
            }
            Ok(PageOutcome::Parsed(page)) => {
                self.merge_page(page, clear_keys, events);
                true
            }
            Err(e) => {
                warn!(audience = L::AUDIENCE.name(), error = %e, "page failed");
                first_error.get_or_insert(e);
                false
            }
        }
    }

    fn merge_page<L: Family>(&mut self, page: ParsedPage<L>, clear_keys: bool, events: &mut EventBatch) {
        let ParsedPage { entities: mut data, hash } = page;
        let now = self.clock.timestamp();
        let today = self.clock.today_index();
        let current_week = self.clock.current_week();
        let v2 = &self.config.parser.v2;

        let prune = PrunePolicy {
            today,
            site_min_day: site_min_day(&data),
            preserve_week: (v2.week_policy == WeekPolicy::PreferCurrent && !has_days_in_week(&data, current_week))
                .then_some(current_week),
        };
        if v2.enabled {
            filter_entity_weeks(&mut data, v2.week_policy, current_week);
        }

        let fresh_keys: HashSet<String> = data.keys().cloned().collect();
        let cache = L::cache_mut(&mut self.caches);

        if clear_keys {
            let before = cache.entities.len();
            cache.entities.retain(|key, _| fresh_keys.contains(key));
            info!(removed = before - cache.entities.len(), "cleared stale keys");
        }

        let mut archive = Vec::new();

        for (key, entity) in data {
            if !cache.entities.contains_key(&key) {
                archive.extend(entity.days.iter().map(|day| L::archived(&key, day.clone())));
                cache.entities.insert(key, entity);
                continue;
            }
            let Some(current) = cache.entities.get_mut(&key) else {
                continue;
            };

            let DiffResult {
                merged_days,
                added,
                changed,
            } = merge_days(entity.days, std::mem::take(&mut current.days));
            if !added.is_empty() || !changed.is_empty() {
                debug!(key = %key, added = added.len(), changed = changed.len(), "days changed");
            }

            let touched = added
                .into_iter()
                .map(|day| (day, false))
                .chain(changed.into_iter().map(|day| (day, true)));

            for (day, is_changed) in touched {
                if let Ok(index) = day.day_index() {
                    if let Some(kind) = classify_day_event(index, is_changed, current.last_noticed_day, today) {
                        if index.is_tomorrow(today) {
                            current.last_noticed_day = Some(index);
                        }
                        L::day_events(events, kind).push(DayEvent {
                            key: key.clone(),
                            day: day.clone(),
                        });
                    }
                }
                archive.push(L::archived(&key, day));
            }

            current.days = merged_days;
        }

        cache.entities.retain(|key, entity| {
            let removed = prune_days(&mut entity.days, &prune);
            archive.extend(removed.into_iter().map(|day| L::archived(key, day)));
            !(entity.days.is_empty() && !fresh_keys.contains(key))
        });

        if !archive.is_empty() {
            debug!(audience = L::AUDIENCE.name(), days = archive.len(), "archiving days");
            events.flush_cache.extend(archive);
        }

        if let Some(max) = max_week(&cache.entities) {
            if let Some(last) = cache.last_week_index {
                if max > last {
                    info!(audience = L::AUDIENCE.name(), week = %max, "new week published");
                    events.update_week.push(WeekEvent {
                        chat_mode: L::AUDIENCE,
                        week_index: max,
                    });
                }

                if max.value() - last.value() > v2.week_jump_threshold {
                    let err = TimetableError::WeekJump {
                        from: last.value(),
                        to: max.value(),
                    }
                    .with_context(ParserContext {
                        hash: hash.clone(),
                        ..ParserContext::stage("week")
                    });
                    warn!(error = %err, "week jump");
                    events.error.push(err.report());
                }
            }
            cache.last_week_index = Some(max);
        }

        if let Some(hash) = hash {
            if cache.content_hash != hash {
                cache.last_changed = Some(now);
            }
            cache.content_hash = hash;
        }
        cache.last_update = Some(now);

        info!(audience = L::AUDIENCE.name(), entities = cache.entities.len(), "cache updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{FixedClock, WeekIndex};
    use crate::parser::test_fixtures::{timetable_page, week_table};
    use crate::scraper::memory::MemorySource;
    use crate::storage::temp_dir;
    use chrono::NaiveDate;
    use std::path::Path;

    const GROUP_URL: &str = "https://college.test/rasp/groups";
    const TEACHER_URL: &str = "https://college.test/rasp/teachers";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.parser.endpoints.timetable_group = GROUP_URL.into();
        config.parser.endpoints.timetable_teacher = TEACHER_URL.into();
        config.storage.cache_dir = dir.to_path_buf();
        config
    }

    fn pipeline(config: AppConfig, source: &Arc<MemorySource>, today: NaiveDate) -> Pipeline {
        let store = CacheStore::new(&config.storage.cache_dir);
        let source: Arc<dyn TimetableSource> = source.clone();
        Pipeline::new(config, source, Arc::new(FixedClock::at_noon(today)), store, Caches::default())
    }

    fn group_page(sections: &[(&str, String)]) -> String {
        timetable_page(sections)
    }

    fn group_week(monday: NaiveDate, lesson: &str) -> String {
        group_page(&[("Группа - 51", week_table(monday, &[("1", lesson, "215")]))])
    }

    fn teacher_page(monday: NaiveDate) -> String {
        timetable_page(&[(
            "Преподаватель - Иванов И. И.",
            week_table(monday, &[("1", "51 - Математика (лк)", "215")]),
        )])
    }

    fn source_with(group: String, monday: NaiveDate) -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::default());
        source.set(GROUP_URL, group);
        source.set(TEACHER_URL, teacher_page(monday));
        source
    }

    #[tokio::test]
    async fn test_identical_page_short_circuits() {
        let dir = temp_dir("pipeline-hash");
        let monday = date(2025, 9, 1);
        let source = source_with(group_week(monday, "Математика (лк) Иванов И.И."), monday);
        let mut pipeline = pipeline(config(&dir), &source, monday);

        let first = pipeline.run_cycle().await;
        assert_eq!(first.failure, None);
        assert!(first.events.update_week.is_empty());
        assert_eq!(first.events.flush_cache.len(), 12);
        let week = pipeline.caches().groups.last_week_index;
        assert_eq!(week, Some(WeekIndex::from_date(monday)));
        let entities = pipeline.caches().groups.entities.clone();

        let second = pipeline.run_cycle().await;
        assert_eq!(second.failure, None);
        assert!(second.events.is_empty(), "{:?}", second.events);
        assert_eq!(pipeline.caches().groups.last_week_index, week);
        assert_eq!(pipeline.caches().groups.entities, entities);
        assert_eq!(source.fetch_count(), 4);
        assert!(dir.join("groups.json").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_new_week_emits_one_update_week() {
        let dir = temp_dir("pipeline-week");
        let monday = date(2025, 9, 1);
        let next_monday = date(2025, 9, 8);

        let source = source_with(
            group_page(&[
                ("Группа - 51", week_table(monday, &[("1", "Математика (лк) Иванов И.И.", "215")])),
                ("Группа - 51", week_table(next_monday, &[])),
            ]),
            monday,
        );
        let mut pipeline = pipeline(config(&dir), &source, monday);

        let first = pipeline.run_cycle().await;
        assert_eq!(first.failure, None);
        let days = &pipeline.caches().groups.entities["51"].days;
        assert_eq!(days.len(), 6);
        assert_eq!(days[0].date, "01.09.2025");
        assert_eq!(days[0].lesson_count(), 1);

        source.set(
            GROUP_URL,
            group_page(&[("Группа - 51", week_table(next_monday, &[("1", "Химия (пз) Петров П.П.", "301")]))]),
        );
        let second = pipeline.run_cycle().await;
        assert_eq!(second.failure, None);
        assert_eq!(
            second.events.update_week,
            vec![WeekEvent {
                chat_mode: Audience::Student,
                week_index: WeekIndex::from_date(next_monday),
            }]
        );
        assert!(second.events.error.is_empty());
        assert!(second.events.add_group_day.is_empty());
        assert_eq!(
            pipeline.caches().groups.last_week_index,
            Some(WeekIndex::from_date(next_monday))
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_tomorrow_changes_add_then_update() {
        let dir = temp_dir("pipeline-tomorrow");
        let sunday = date(2025, 8, 31);
        let monday = date(2025, 9, 1);
        let source = source_with(group_week(monday, "Математика (лк) Иванов И.И."), monday);
        let mut pipeline = pipeline(config(&dir), &source, sunday);

        let first = pipeline.run_cycle().await;
        assert_eq!(first.failure, None);
        assert!(first.events.add_group_day.is_empty());

        source.set(GROUP_URL, group_week(monday, "Физика (лк) Иванов И.И."));
        let second = pipeline.run_cycle().await;
        assert_eq!(second.events.add_group_day.len(), 1);
        assert_eq!(second.events.add_group_day[0].key, "51");
        assert_eq!(second.events.add_group_day[0].day.date, "01.09.2025");
        assert!(second.events.update_group_day.is_empty());

        source.set(GROUP_URL, group_week(monday, "Химия (лк) Иванов И.И."));
        let third = pipeline.run_cycle().await;
        assert!(third.events.add_group_day.is_empty());
        assert_eq!(third.events.update_group_day.len(), 1);
        assert_eq!(third.events.flush_cache.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_quarantine_keeps_cache_and_reports() {
        let dir = temp_dir("pipeline-quarantine");
        let monday = date(2025, 9, 1);
        let mut config = config(&dir);
        config.parser.v2.quarantine.min_lessons = 5;

        let source = source_with(group_week(monday, "Математика (лк) Иванов И.И."), monday);
        let mut pipeline = pipeline(config, &source, monday);

        for _ in 0..2 {
            let report = pipeline.run_cycle().await;
            assert_eq!(report.failure, None);
            assert_eq!(report.events.error.len(), 2);
            assert!(report.events.error[0].message.starts_with("quarantined: 1 lessons"));
            assert_eq!(
                report.events.error[0].context.as_ref().map(|c| c.stage.as_str()),
                Some("quarantine")
            );
        }

        assert!(pipeline.caches().groups.entities.is_empty());
        assert_eq!(pipeline.caches().groups.content_hash, "");
        assert_eq!(source.fetch_count(), 4);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_empty_page_fails_and_escalates_on_third_cycle() {
        let dir = temp_dir("pipeline-empty");
        let monday = date(2025, 9, 1);
        let source = source_with(group_page(&[]), monday);
        let mut pipeline = pipeline(config(&dir), &source, monday);

        let mut reports = Vec::new();
        for _ in 0..4 {
            reports.push(pipeline.run_cycle().await);
        }

        let failure = reports[0].failure.as_ref().unwrap();
        assert_eq!(failure.message, "timetable is empty {groups:false,teachers:true}");
        assert!(reports[0].events.error.is_empty());
        assert!(reports[1].events.error.is_empty());
        assert_eq!(reports[2].events.error, vec![failure.clone()]);
        assert!(reports[3].events.error.is_empty());

        assert!(!pipeline.caches().success_update);
        assert!(pipeline.health().has_errors(3));
        assert_eq!(pipeline.caches().teachers.entities.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_other_family() {
        let dir = temp_dir("pipeline-fetch");
        let monday = date(2025, 9, 1);
        let source = Arc::new(MemorySource::default());
        source.set(TEACHER_URL, teacher_page(monday));
        let mut pipeline = pipeline(config(&dir), &source, monday);

        let report = pipeline.run_cycle().await;
        let failure = report.failure.unwrap();
        assert_eq!(failure.message, format!("HTTP 404 for {GROUP_URL}"));
        assert_eq!(failure.context.map(|c| c.stage), Some("fetch".to_string()));
        assert_eq!(pipeline.caches().teachers.entities.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_forced_clear_keys_drops_missing_entities() {
        let dir = temp_dir("pipeline-clear");
        let monday = date(2025, 9, 1);
        let lesson = [("1", "Математика (лк) Иванов И.И.", "215")];
        let source = source_with(
            group_page(&[
                ("Группа - 51", week_table(monday, &lesson)),
                ("Группа - 52", week_table(monday, &lesson)),
            ]),
            monday,
        );
        let mut pipeline = pipeline(config(&dir), &source, monday);
        pipeline.run_cycle().await;
        assert_eq!(pipeline.caches().groups.entities.len(), 2);

        source.set(GROUP_URL, group_page(&[("Группа - 51", week_table(monday, &lesson))]));
        pipeline.run_cycle().await;
        assert_eq!(pipeline.caches().groups.entities.len(), 2);

        pipeline.trigger().force_parse(true);
        pipeline.run_cycle().await;
        assert_eq!(
            pipeline.caches().groups.entities.keys().collect::<Vec<_>>(),
            vec!["51"]
        );
        assert_eq!(pipeline.flush_all().flush_cache.len(), 12);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_local_mode_reads_cache_files() {
        let dir = temp_dir("pipeline-local");
        let monday = date(2025, 9, 1);
        let source = source_with(group_week(monday, "Математика (лк) Иванов И.И."), monday);
        pipeline(config(&dir), &source, monday).run_cycle().await;

        let mut config = config(&dir);
        config.parser.local_mode = true;
        let offline = Arc::new(MemorySource::default());
        let store = CacheStore::new(&dir);
        let caches = store.load_all().unwrap();
        let source: Arc<dyn TimetableSource> = offline.clone();
        let mut pipeline = Pipeline::new(config, source, Arc::new(FixedClock::at_noon(monday)), store, caches);

        let report = pipeline.run_cycle().await;
        assert_eq!(report.failure, None);
        assert!(report.events.is_empty());
        assert_eq!(offline.fetch_count(), 0);
        assert_eq!(pipeline.caches().groups.entities.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    // ── Parser selection ──

    fn overfull_teacher_page(monday: NaiveDate) -> String {
        timetable_page(&[(
            "Преподаватель - Иванов И. И.",
            week_table(
                monday,
                &[
                    ("1", "51 - Математика (лк)", "215"),
                    ("11", "Математика<br>(пз)<br>1. 51", "301"),
                ],
            ),
        )])
    }

    fn parse_teachers(pipeline: &Pipeline, html: &str) -> (PageResult<TeacherLesson>, ParserContext) {
        let doc = Html::parse_document(html);
        let mut context = ParserContext::stage("content");
        let result = pipeline.parse_document::<TeacherLesson>(&doc, ParserKind::TeacherV2, &mut context);
        (result, context)
    }

    fn parsed<L>(result: PageResult<L>) -> ParsedPage<L> {
        match result {
            Ok(PageOutcome::Parsed(page)) => page,
            Ok(_) => panic!("page was not parsed"),
            Err(e) => panic!("page failed: {e}"),
        }
    }

    #[test]
    fn test_strict_validation_recovers_with_legacy_parser() {
        let dir = temp_dir("pipeline-strict");
        let monday = date(2025, 9, 1);
        let mut config = config(&dir);
        config.parser.v2.strict = true;
        let pipeline = pipeline(config, &Arc::new(MemorySource::default()), monday);

        let (result, context) = parse_teachers(&pipeline, &overfull_teacher_page(monday));
        let page = parsed(result);

        // The v1 rules cannot read the multi-line cell of lesson 11.
        assert_eq!(page.entities["Иванов И. И."].days[0].lessons.len(), 1);
        assert!(context.fallback_used);
        assert_eq!(context.parser.as_deref(), Some("teacher-v1"));
        assert!(context.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn test_strict_validation_without_fallback_fails_cycle() {
        let dir = temp_dir("pipeline-strict-fail");
        let monday = date(2025, 9, 1);
        let mut config = config(&dir);
        config.parser.v2.strict = true;
        config.parser.v2.fallback_to_v1 = false;

        let source = source_with(group_week(monday, "Математика (лк) Иванов И.И."), monday);
        source.set(TEACHER_URL, overfull_teacher_page(monday));
        let mut pipeline = pipeline(config, &source, monday);

        let report = pipeline.run_cycle().await;
        let failure = report.failure.unwrap();
        let context = failure.context.unwrap();
        assert_eq!(context.stage, "validate");
        assert_eq!(context.parser.as_deref(), Some("teacher-v2"));
        assert!(!context.fallback_used);
        assert_eq!(
            context.validation_errors,
            vec!["Иванов И. И.: too many lessons 01.09.2025".to_string()]
        );

        assert!(pipeline.caches().teachers.entities.is_empty());
        assert_eq!(pipeline.caches().groups.entities.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_primary_result_uses_legacy_parser() {
        let dir = temp_dir("pipeline-fallback");
        let monday = date(2025, 9, 1);
        let pipeline = pipeline(config(&dir), &Arc::new(MemorySource::default()), monday);

        // Two day columns are too few for the v2 header search.
        let table = r#"<table>
            <tr><th>№</th><th colspan="2">Понедельник, 01.09.2025</th><th colspan="2">Вторник, 02.09.2025</th></tr>
            <tr><td>1</td><td>51 - Математика (лк)</td><td>215</td><td></td><td></td></tr>
        </table>"#;
        let html = timetable_page(&[("Преподаватель - Иванов И. И.", table.to_string())]);

        let (result, context) = parse_teachers(&pipeline, &html);
        let page = parsed(result);

        let days = &page.entities["Иванов И. И."].days;
        assert_eq!(days.len(), 2);
        let lesson = days[0].lessons[0].as_ref().unwrap();
        assert_eq!(lesson.subject, "Математика");
        assert_eq!(lesson.group, "51");
        assert!(context.fallback_used);
        assert_eq!(context.parser.as_deref(), Some("teacher-v1"));
    }

    #[test]
    fn test_diff_log_keeps_primary_result() {
        let dir = temp_dir("pipeline-diff");
        let monday = date(2025, 9, 1);
        let mut config = config(&dir);
        config.parser.v2.diff_log = true;
        let pipeline = pipeline(config, &Arc::new(MemorySource::default()), monday);

        let html = timetable_page(&[
            (
                "Преподаватель - Иванов И. И.",
                week_table(monday, &[("1", "51 - Математика (лк)", "215")]),
            ),
            (
                "Преподаватель - Иванов И. И.",
                week_table(date(2025, 9, 8), &[("2", "52 - Физика (пз)", "101")]),
            ),
        ]);
        let (result, context) = parse_teachers(&pipeline, &html);
        let page = parsed(result);

        let days = &page.entities["Иванов И. И."].days;
        assert_eq!(days.len(), 6);
        assert_eq!(days[0].date, "01.09.2025");
        assert!(!context.fallback_used);
        assert_eq!(context.parser.as_deref(), Some("teacher-v2"));
    }
}
