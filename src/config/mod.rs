use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::parser::{DoubleLessonRule, HashMode, ParseOptions, ValidationLimits, WeekPolicy};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub parser: ParserConfig,
    pub storage: StorageConfig,
}

/// Poll cycle, fetch and engine options
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserConfig {
    pub enabled: bool,
    /// Fetch and parse pages one after another.
    pub sync_mode: bool,
    /// Read cached JSON instead of fetching pages.
    pub local_mode: bool,
    pub ignore_hash: bool,
    pub cycle_timeout_secs: u64,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub endpoints: EndpointsConfig,
    pub fetch: FetchConfig,
    pub v2: V2Config,
    pub update_interval: UpdateIntervalConfig,
    /// Activity hours `[from, to)`, local time.
    pub activity: [u32; 2],
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub timetable_group: String,
    pub timetable_teacher: String,
    pub team: Vec<String>,
}

/// Bounded fixed-backoff retries for page GETs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub retries: usize,
    pub backoff_ms: u64,
    pub retry_statuses: Vec<u16>,
    pub retry_error_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct V2Config {
    pub enabled: bool,
    pub fallback_to_v1: bool,
    pub week_policy: WeekPolicy,
    pub allow_two_tables: bool,
    pub strict: bool,
    pub diff_log: bool,
    pub diff_log_limit: usize,
    pub header_scan_rows: usize,
    pub min_days_in_table: usize,
    pub max_lessons_per_day: usize,
    pub validation_sample: usize,
    pub hash_mode: HashMode,
    pub week_jump_threshold: i64,
    pub sunday_hold_current: bool,
    pub placeholder_type: String,
    pub double_lesson_comment: String,
    pub raw_html: RawHtmlConfig,
    pub quarantine: QuarantineConfig,
    pub metrics: MetricsConfig,
}

/// Raw HTML snapshots for forensic diffing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RawHtmlConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub max_days: u32,
    /// Serve this file instead of fetching pages.
    pub replay_path: Option<PathBuf>,
    pub diff_max_lines: usize,
    pub store_daily: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuarantineConfig {
    pub enabled: bool,
    pub min_lessons: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

/// Poll delays, in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateIntervalConfig {
    pub default: u64,
    pub activity: u64,
    pub error: u64,
    pub teams: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub cache_dir: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_user_agent() -> String {
    concat!("timetable-watch/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_mode: false,
            local_mode: false,
            ignore_hash: false,
            cycle_timeout_secs: 60,
            user_agent: default_user_agent(),
            request_timeout_secs: 30,
            endpoints: EndpointsConfig::default(),
            fetch: FetchConfig::default(),
            v2: V2Config::default(),
            update_interval: UpdateIntervalConfig::default(),
            activity: [7, 20],
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff_ms: 500,
            retry_statuses: vec![408, 429, 500, 502, 503, 504],
            retry_error_codes: ["ETIMEDOUT", "ECONNRESET", "ECONNREFUSED", "EAI_AGAIN"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl Default for V2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_to_v1: true,
            week_policy: WeekPolicy::PreferCurrent,
            allow_two_tables: true,
            strict: false,
            diff_log: false,
            diff_log_limit: 20,
            header_scan_rows: 5,
            min_days_in_table: 5,
            max_lessons_per_day: 10,
            validation_sample: 10,
            hash_mode: HashMode::Content,
            week_jump_threshold: 2,
            sunday_hold_current: true,
            placeholder_type: "ф-в".to_string(),
            double_lesson_comment: "2 часа".to_string(),
            raw_html: RawHtmlConfig::default(),
            quarantine: QuarantineConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RawHtmlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("cache/raw-html"),
            max_days: 14,
            replay_path: None,
            diff_max_lines: 200,
            store_daily: true,
        }
    }
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_lessons: 1,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("cache/metrics"),
        }
    }
}

impl Default for UpdateIntervalConfig {
    fn default() -> Self {
        Self {
            default: 300,
            activity: 60,
            error: 30,
            teams: 86_400,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache/rasp"),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("TIMETABLE").separator("__"))
            .build()?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

impl ParserConfig {
    pub fn parse_options(&self, today: NaiveDate) -> ParseOptions {
        ParseOptions {
            today,
            week_policy: self.v2.week_policy,
            sunday_hold_current: self.v2.sunday_hold_current,
            allow_two_tables: self.v2.allow_two_tables,
            strict: self.v2.strict,
            header_scan_rows: self.v2.header_scan_rows,
            min_days_in_table: self.v2.min_days_in_table,
            double_lesson: DoubleLessonRule {
                placeholder_type: self.v2.placeholder_type.clone(),
                comment: self.v2.double_lesson_comment.clone(),
            },
        }
    }

    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_lessons_per_day: self.v2.max_lessons_per_day,
            sample_size: self.v2.validation_sample,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(cfg.parser.v2.enabled);
        assert_eq!(cfg.parser.fetch.retries, 2);
        assert_eq!(cfg.parser.v2.week_policy, WeekPolicy::PreferCurrent);
        assert_eq!(cfg.storage.cache_dir, PathBuf::from("cache/rasp"));
    }

    #[test]
    fn test_partial_toml_overrides() {
        let toml = r#"
            [parser.v2]
            week_policy = "closest"
            hash_mode = "tables"

            [parser.v2.quarantine]
            min_lessons = 50
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.parser.v2.week_policy, WeekPolicy::Closest);
        assert_eq!(cfg.parser.v2.hash_mode, HashMode::Tables);
        assert_eq!(cfg.parser.v2.quarantine.min_lessons, 50);
        assert!(cfg.parser.v2.quarantine.enabled);
        assert_eq!(cfg.parser.v2.diff_log_limit, 20);
    }
}
