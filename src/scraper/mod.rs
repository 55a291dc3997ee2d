pub mod http_client;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::ParserConfig;
use crate::error::TimetableError;

use self::http_client::HttpClient;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable page source abstraction.
#[async_trait]
pub trait TimetableSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, TimetableError>;
}

#[async_trait]
impl TimetableSource for HttpClient {
    async fn fetch(&self, url: &str) -> Result<String, TimetableError> {
        self.get_text(url).await
    }
}

// ── Replay ────────────────────────────────────────────────────────────────────

/// Serves one HTML file for every URL.
pub struct ReplaySource {
    path: PathBuf,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TimetableSource for ReplaySource {
    async fn fetch(&self, url: &str) -> Result<String, TimetableError> {
        debug!(url, path = %self.path.display(), "replaying page");
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }
}

/// HTTP, or the replay file when one is configured.
pub fn build_source(config: &ParserConfig) -> Result<Arc<dyn TimetableSource>, TimetableError> {
    match &config.v2.raw_html.replay_path {
        Some(path) => Ok(Arc::new(ReplaySource::new(path))),
        None => Ok(Arc::new(HttpClient::new(config)?)),
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────
