//! Client for the third-party lookup APIs.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

/// Placeholder replaced by the user's input in a URL template.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Rendered JSON longer than this is cut off before display.
pub const MAX_RENDERED_CHARS: usize = 3800;

#[derive(Debug)]
pub enum LookupError {
    /// Transport failure or timeout.
    Http(String),
    /// Upstream answered with a non-success status.
    Status(u16),
    /// Body was not JSON.
    Parse(String),
}

impl LookupError {
    /// Client errors other than 429 will not get better on retry.
    fn is_retryable(&self) -> bool {
        match self {
            LookupError::Status(code) => *code == 429 || *code >= 500,
            LookupError::Http(_) | LookupError::Parse(_) => true,
        }
    }
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupError::Http(e) => write!(f, "HTTP error: {e}"),
            LookupError::Status(code) => write!(f, "upstream returned status {code}"),
            LookupError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for LookupError {}

/// Build the request URL for `input`.
pub fn build_url(template: &str, input: &str) -> String {
    let encoded = urlencoding::encode(input);
    if template.contains(INPUT_PLACEHOLDER) {
        template.replace(INPUT_PLACEHOLDER, &encoded)
    } else {
        format!("{template}{encoded}")
    }
}

/// Pretty-print `value`, truncated to `max_chars` characters.
pub fn render_json(value: &Value, max_chars: usize) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    if pretty.chars().count() <= max_chars {
        return pretty;
    }
    let truncated: String = pretty.chars().take(max_chars).collect();
    format!("{truncated}\n... (truncated)")
}

pub struct LookupClient {
    http: reqwest::Client,
    attempts: u32,
    base_delay: Duration,
}

impl LookupClient {
    pub fn new(timeout: Duration, attempts: u32, base_delay: Duration) -> Result<Self, LookupError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Http(e.to_string()))?;

        Ok(Self {
            http,
            attempts: attempts.max(1),
            base_delay,
        })
    }

    /// Fetch `input` from the endpoint behind `template`.
    /// Retries a fixed number of times, doubling the delay after each failure.
    pub async fn fetch(&self, template: &str, input: &str) -> Result<Value, LookupError> {
        let url = build_url(template, input);
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            match self.fetch_once(&url).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("Lookup succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.attempts && e.is_retryable() => {
                    warn!("Lookup attempt {attempt}/{} failed: {e}", self.attempts);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Lookup failed after {attempt} attempt(s): {e}");
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Value, LookupError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LookupError::Http(e.to_string()))?;

        let status = response.status();
        debug!("Lookup response status: {status}");
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LookupError::Http(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| LookupError::Parse(e.to_string()))
    }
}
