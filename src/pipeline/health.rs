//! Recent cycle results and failure escalation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::FailureReport;

const MAX_ENTRIES: usize = 10;
const ESCALATE_AFTER: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum CycleResult {
    Success { ms: u128 },
    Failure(FailureReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: CycleResult,
}

impl HealthEntry {
    fn failure_message(&self) -> Option<&str> {
        match &self.result {
            CycleResult::Failure(report) => Some(&report.message),
            CycleResult::Success { .. } => None,
        }
    }
}

/// The most recent cycle results, newest first.
#[derive(Debug, Default)]
pub struct HealthLog {
    entries: VecDeque<HealthEntry>,
}

impl HealthLog {
    pub fn entries(&self) -> impl Iterator<Item = &HealthEntry> {
        self.entries.iter()
    }

    pub fn record_success(&mut self, at: DateTime<Utc>, took: Duration) {
        self.push(HealthEntry {
            at,
            result: CycleResult::Success { ms: took.as_millis() },
        });
    }

    /// Returns the report to surface when this failure completes a streak
    /// of identical failures.
    pub fn record_failure(&mut self, at: DateTime<Utc>, report: FailureReport) -> Option<FailureReport> {
        self.push(HealthEntry {
            at,
            result: CycleResult::Failure(report.clone()),
        });

        let streak = self
            .entries
            .iter()
            .take_while(|entry| entry.failure_message() == Some(report.message.as_str()))
            .count();

        (streak == ESCALATE_AFTER).then_some(report)
    }

    /// The last `need` cycles all failed.
    pub fn has_errors(&self, need: usize) -> bool {
        self.entries.len() >= need && self.entries.iter().take(need).all(|e| e.failure_message().is_some())
    }

    fn push(&mut self, entry: HealthEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(MAX_ENTRIES);
    }
}
