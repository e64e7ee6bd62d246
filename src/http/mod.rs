//! Retry/backoff HTTP client shared by every protocol adapter.
//!
//! The [`RetryClient`] wraps a single outbound HTTP call with bounded
//! exponential-backoff retry for transient failures. It retries on 429,
//! 5xx, and network-level failures (timeout, connection reset); other
//! statuses are returned to the caller immediately. The client has no
//! knowledge of record formats.
//!
//! # Backoff
//!
//! Before retry attempt `n` (counted from 1) the client sleeps
//! `backoff_base^n` seconds, capped, plus a small random jitter. A
//! `Retry-After` header on a 429 response is honored when it exceeds the
//! computed backoff.

mod throttle;

pub use throttle::Throttle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Method, Response};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::HttpSettings;

/// Maximum honored Retry-After value to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Maximum random jitter added to each backoff sleep.
const MAX_JITTER: Duration = Duration::from_millis(250);

/// User agent sent on all harvest requests.
const USER_AGENT: &str = concat!("oerharvest/", env!("CARGO_PKG_VERSION"));

/// Errors raised by the retry client.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Network-level error (DNS, connection refused, reset, TLS).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Retryable HTTP status persisted through every attempt.
    #[error("HTTP {status} requesting {url} after {attempts} attempts")]
    Status {
        /// The URL that kept failing.
        url: String,
        /// The final HTTP status code.
        status: u16,
        /// How many attempts were made.
        attempts: u32,
    },

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// HTTP client construction failed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl HttpError {
    /// Creates a network error with URL context.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

/// Returns true for statuses the client retries: 429 and [500, 599].
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Retry behavior configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the initial one (minimum 1).
    max_attempts: u32,
    /// Exponential base: sleep `base^attempt` seconds.
    backoff_base: f64,
    /// Cap on a single backoff sleep.
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            max_backoff: Duration::from_secs(64),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: f64, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            max_backoff,
        }
    }

    /// Creates a policy with a custom attempt count, defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt count.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff sleep before the retry following failed attempt `attempt`
    /// (1-indexed): `base^attempt` seconds, capped, plus jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.backoff_base.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let capped = secs.min(self.max_backoff.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped) + jitter()
    }
}

fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    #[allow(clippy::cast_possible_truncation)]
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Parses a `Retry-After` header value: delta-seconds or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER));
    }
    let when = httpdate::parse_http_date(trimmed).ok()?;
    let delay = when.duration_since(std::time::SystemTime::now()).ok()?;
    Some(delay.min(MAX_RETRY_AFTER))
}

/// HTTP client with bounded exponential-backoff retry and a cooperative
/// per-host throttle.
///
/// Cloning is cheap; the underlying connection pool and throttle map are
/// shared.
#[derive(Debug, Clone)]
pub struct RetryClient {
    client: Client,
    policy: RetryPolicy,
    throttle: Arc<Throttle>,
}

impl RetryClient {
    /// Builds a client from HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Build`] if reqwest client construction fails.
    pub fn new(settings: &HttpSettings) -> Result<Self, HttpError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(HttpError::Build)?;

        Ok(Self {
            client,
            policy: RetryPolicy::new(
                settings.max_attempts,
                settings.backoff_base,
                Duration::from_secs(settings.max_backoff_secs),
            ),
            throttle: Arc::new(Throttle::new(Duration::from_millis(settings.throttle_ms))),
        })
    }

    /// Overrides the retry policy (used by `test_connection` probes and tests).
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the active retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issues a request, retrying transient failures with backoff.
    ///
    /// Retries on 429, 5xx and network-level failure; any other response
    /// is returned immediately (including non-retryable 4xx - the caller
    /// decides how to treat those). Once attempts are exhausted the last
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] on invalid URLs, exhausted retries, or a
    /// network failure on the final attempt.
    #[instrument(skip(self, method, url, headers, params), fields(method = %method, url = %url))]
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        params: &[(String, String)],
    ) -> Result<Response, HttpError> {
        let target = build_url(url, params)?;
        self.execute_url(method, target, headers).await
    }

    /// Issues a request against an already-built URL.
    ///
    /// # Errors
    ///
    /// See [`RetryClient::execute`].
    pub async fn execute_url(
        &self,
        method: Method,
        target: Url,
        headers: &HashMap<String, String>,
    ) -> Result<Response, HttpError> {
        let url_text = target.to_string();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.throttle.acquire(&target).await;

            let mut request = self.client.request(method.clone(), target.clone());
            for (name, value) in headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if !is_retryable_status(status) {
                        return Ok(response);
                    }

                    if attempt >= self.policy.max_attempts() {
                        return Err(HttpError::Status {
                            url: url_text,
                            status,
                            attempts: attempt,
                        });
                    }

                    let mut delay = self.policy.delay_for(attempt);
                    if status == 429 {
                        if let Some(retry_after) = response
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(parse_retry_after)
                        {
                            delay = delay.max(retry_after);
                        }
                    }
                    warn!(status, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if attempt >= self.policy.max_attempts() {
                        return Err(if error.is_timeout() {
                            HttpError::timeout(url_text)
                        } else {
                            HttpError::network(url_text, error)
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(error = %error, attempt, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Convenience GET with retry.
    ///
    /// # Errors
    ///
    /// See [`RetryClient::execute`].
    pub async fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        params: &[(String, String)],
    ) -> Result<Response, HttpError> {
        self.execute(Method::GET, url, headers, params).await
    }
}

/// Builds the request URL, appending query parameters.
fn build_url(url: &str, params: &[(String, String)]) -> Result<Url, HttpError> {
    let mut target = Url::parse(url).map_err(|_| HttpError::invalid_url(url))?;
    if !params.is_empty() {
        let mut pairs = target.query_pairs_mut();
        for (name, value) in params {
            pairs.append_pair(name, value);
        }
        drop(pairs);
    }
    debug!(target = %target, "built request URL");
    Ok(target)
}
