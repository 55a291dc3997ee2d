//! Calendar ordinals used by every policy decision.
//!
//! * [`StringDate`]: the canonical `dd.mm.yyyy` form used in caches and events.
//! * [`DayIndex`]: one unit per calendar day since 1970-01-01.
//! * [`WeekIndex`]: one unit per school week (Monday–Saturday, Sunday folded
//!   back into the week that just ended), anchored on Monday 1970-01-05.
//! * [`Clock`]: the source of "now", so today/tomorrow logic is testable.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TimetableError;

/// `NaiveDate::num_days_from_ce()` of 1970-01-01.
const EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Day index of Monday 1970-01-05, the first day of week 0.
const WEEK_ANCHOR_DAY: i64 = 4;

// ── Clock ─────────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    /// Local wall-clock time.
    fn now(&self) -> NaiveDateTime;

    /// Timestamp stored in caches.
    fn timestamp(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    fn today_index(&self) -> DayIndex {
        DayIndex::from_date(self.today())
    }

    fn current_week(&self) -> WeekIndex {
        WeekIndex::from_date(self.today())
    }

    fn is_sunday(&self) -> bool {
        self.today().weekday() == Weekday::Sun
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    pub fn at_noon(date: NaiveDate) -> Self {
        Self(date.and_hms_opt(12, 0, 0).unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.0.and_utc()
    }
}

// ── StringDate ────────────────────────────────────────────────────────────────

/// Canonical `dd.mm.yyyy` date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StringDate(NaiveDate);

impl StringDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn is_sunday(&self) -> bool {
        self.0.weekday() == Weekday::Sun
    }

    pub fn day_index(&self) -> DayIndex {
        DayIndex::from_date(self.0)
    }

    pub fn week_index(&self) -> WeekIndex {
        WeekIndex::from_date(self.0)
    }
}

impl FromStr for StringDate {
    type Err = TimetableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TimetableError::InvalidDate(s.to_string());

        let mut parts = s.trim().split('.');
        let (Some(day), Some(month), Some(year), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let day: u32 = day.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if year.len() != 4 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;

        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for StringDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}.{:02}.{}", self.0.day(), self.0.month(), self.0.year())
    }
}

impl TryFrom<String> for StringDate {
    type Error = TimetableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StringDate> for String {
    fn from(value: StringDate) -> Self {
        value.to_string()
    }
}

// ── DayIndex ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayIndex(i64);

impl DayIndex {
    pub fn from_value(value: i64) -> Self {
        Self(value)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.num_days_from_ce() as i64 - EPOCH_DAYS_FROM_CE)
    }

    pub fn from_string_date(value: &str) -> Result<Self, TimetableError> {
        Ok(value.parse::<StringDate>()?.day_index())
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn to_date(self) -> Option<NaiveDate> {
        let days = i32::try_from(self.0 + EPOCH_DAYS_FROM_CE).ok()?;
        NaiveDate::from_num_days_from_ce_opt(days)
    }

    pub fn offset(self, days: i64) -> Self {
        Self(self.0 + days)
    }

    pub fn week(self) -> WeekIndex {
        match self.to_date() {
            Some(date) => WeekIndex::from_date(date),
            None => WeekIndex((self.0 - WEEK_ANCHOR_DAY).div_euclid(7)),
        }
    }

    pub fn is_today(self, today: DayIndex) -> bool {
        self == today
    }

    pub fn is_tomorrow(self, today: DayIndex) -> bool {
        self.0 == today.0 + 1
    }

    pub fn is_not_past(self, today: DayIndex) -> bool {
        self >= today
    }
}

impl fmt::Display for DayIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── WeekIndex ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekIndex(i64);

impl WeekIndex {
    pub fn from_value(value: i64) -> Self {
        Self(value)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        let date = if date.weekday() == Weekday::Sun {
            date - Duration::days(1)
        } else {
            date
        };

        Self((DayIndex::from_date(date).0 - WEEK_ANCHOR_DAY).div_euclid(7))
    }

    pub fn from_string_date(value: &str) -> Result<Self, TimetableError> {
        Ok(value.parse::<StringDate>()?.week_index())
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn first_day(self) -> DayIndex {
        DayIndex(self.0 * 7 + WEEK_ANCHOR_DAY)
    }

    /// Monday..=Sunday of this week as day indexes.
    pub fn day_range(self) -> (DayIndex, DayIndex) {
        let first = self.first_day();
        (first, first.offset(6))
    }

    pub fn contains(self, day: DayIndex) -> bool {
        let (start, end) = self.day_range();
        day >= start && day <= end
    }

    pub fn is_future(self, now: WeekIndex) -> bool {
        self > now
    }

    /// Ordinal within the academic year, starting at 1.
    pub fn academic_week_number(self) -> i64 {
        match self.first_day().to_date() {
            Some(date) => academic_week_number(date),
            None => 0,
        }
    }

    pub fn from_academic_week_number(week_number: i64, reference: NaiveDate) -> Self {
        let start = academic_year_start(reference);
        Self::from_date(start + Duration::weeks(week_number - 1))
    }
}

impl fmt::Display for WeekIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First Monday on or after September 1 of the academic year containing `date`.
pub fn academic_year_start(date: NaiveDate) -> NaiveDate {
    let year = if date.month() >= 9 {
        date.year()
    } else {
        date.year() - 1
    };

    // September 1 always exists.
    let start = NaiveDate::from_ymd_opt(year, 9, 1).unwrap_or(date);
    let shift = match start.weekday() {
        Weekday::Mon => 0,
        Weekday::Sun => 1,
        other => 8 - other.num_days_from_sunday() as i64,
    };

    start + Duration::days(shift)
}

pub fn academic_week_number(date: NaiveDate) -> i64 {
    let start = academic_year_start(date);
    (date - start).num_days().div_euclid(7) + 1
}
