use serde::Serialize;
use thiserror::Error;

/// Every failure the extraction pipeline can surface.
#[derive(Debug, Error)]
pub enum TimetableError {
    #[error("fetch failed for {url}: {message} ({code})")]
    Fetch {
        url: String,
        code: String,
        message: String,
    },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("cannot get page content")]
    MissingContent,

    #[error("no timetable table found")]
    NoTimetable,

    #[error("invalid date {0:?}")]
    InvalidDate(String),

    #[error("unable to parse lesson entries: {0}")]
    UnparseableLesson(String),

    #[error("v2 validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("quarantined: {lessons} lessons, minimum is {min}")]
    Quarantine { lessons: usize, min: usize },

    #[error("week jump detected: {from} -> {to}")]
    WeekJump { from: i64, to: i64 },

    #[error("timetable is empty {{groups:{groups},teachers:{teachers}}}")]
    EmptyTimetable { groups: bool, teachers: bool },

    #[error("update timed out")]
    Timeout,

    #[error("{source}")]
    WithContext {
        source: Box<TimetableError>,
        context: Box<ParserContext>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TimetableError {
    pub fn with_context(self, context: ParserContext) -> Self {
        match self {
            // Keep the innermost error, replace the bag.
            TimetableError::WithContext { source, .. } => TimetableError::WithContext {
                source,
                context: Box::new(context),
            },
            other => TimetableError::WithContext {
                source: Box::new(other),
                context: Box::new(context),
            },
        }
    }

    pub fn context(&self) -> Option<&ParserContext> {
        match self {
            TimetableError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn root(&self) -> &TimetableError {
        match self {
            TimetableError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            message: self.to_string(),
            context: self.context().cloned(),
        }
    }
}

/// Diagnostic bag attached to pipeline failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserContext {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

impl ParserContext {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            ..Default::default()
        }
    }
}

/// Cloneable form of an error, carried by `error` events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ParserContext>,
}

impl FailureReport {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
        }
    }
}
