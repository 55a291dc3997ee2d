//! School timetable extraction and change detection.
//!
//! The [`pipeline::Pipeline`] polls the published timetable pages, parses
//! them with [`parser`], merges the result into the JSON caches kept by
//! [`storage`] and reports per-cycle [`pipeline::EventBatch`]es.

pub mod calendar;
pub mod config;
pub mod error;
pub mod loader;
pub mod merge;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod scraper;
pub mod storage;
pub mod utils;
