use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};

use crate::config::{FetchConfig, ParserConfig};
use crate::error::TimetableError;

pub struct HttpClient {
    inner: reqwest::Client,
    retry: FetchConfig,
}

/// Errno-style code for a transport error, matched against the retry allowlist.
fn error_code(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "ETIMEDOUT"
    } else if err.is_connect() {
        "ECONNREFUSED"
    } else {
        "ECONNRESET"
    }
}

impl HttpClient {
    pub fn new(config: &ParserConfig) -> Result<Self, TimetableError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()
            .map_err(|e| TimetableError::Fetch {
                url: String::new(),
                code: "EINIT".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            inner,
            retry: config.fetch.clone(),
        })
    }

    fn is_retryable(&self, err: &TimetableError) -> bool {
        match err {
            TimetableError::HttpStatus { status, .. } => self.retry.retry_statuses.contains(status),
            TimetableError::Fetch { code, .. } => self.retry.retry_error_codes.iter().any(|c| c == code),
            _ => false,
        }
    }

    async fn get_once(&self, url: &str, attempt: usize) -> Result<String, TimetableError> {
        debug!(url, attempt, "GET");

        let fetch_error = |e: reqwest::Error| TimetableError::Fetch {
            url: url.to_string(),
            code: error_code(&e).to_string(),
            message: e.to_string(),
        };

        let resp = self.inner.get(url).send().await.map_err(fetch_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TimetableError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(fetch_error)
    }

    /// GET `url` as text, retrying allowlisted failures with a fixed backoff.
    pub async fn get_text(&self, url: &str) -> Result<String, TimetableError> {
        url::Url::parse(url).map_err(|e| TimetableError::Fetch {
            url: url.to_string(),
            code: "EINVAL".into(),
            message: e.to_string(),
        })?;

        let attempt = AtomicUsize::new(0);
        let strategy = FixedInterval::from_millis(self.retry.backoff_ms).take(self.retry.retries);

        RetryIf::spawn(
            strategy,
            || self.get_once(url, attempt.fetch_add(1, Ordering::Relaxed) + 1),
            |err: &TimetableError| {
                let retry = self.is_retryable(err);
                if retry {
                    warn!(url, error = %err, "retrying fetch");
                }
                retry
            },
        )
        .await
    }
}
