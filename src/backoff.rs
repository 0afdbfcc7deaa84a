use std::sync::Arc;
use std::time::Duration;

use crate::api_defaults;
use crate::config::ConfigProperties;
use crate::error::BCError;
use crate::http::Request;
use crate::io::{HttpRunner, Response, RETRY_AFTER};
use crate::{log_info, log_warn, Result};

const TOO_MANY_REQUESTS: i32 = 429;

/// Retry policy. Immutable once built.
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned")]
pub struct RetryConfig {
    #[builder(default = "api_defaults::DEFAULT_MAX_RETRIES")]
    max_retries: u32,
    #[builder(default = "api_defaults::DEFAULT_INITIAL_BACKOFF")]
    initial_backoff: Duration,
    #[builder(default = "api_defaults::DEFAULT_MAX_BACKOFF")]
    max_backoff: Duration,
    #[builder(default = "api_defaults::DEFAULT_BACKOFF_MULTIPLIER")]
    multiplier: f64,
    #[builder(default = "api_defaults::DEFAULT_RETRYABLE_STATUSES.to_vec()")]
    retryable_statuses: Vec<i32>,
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    pub fn with_config(config: &impl ConfigProperties) -> Self {
        RetryConfig {
            max_retries: config.max_retries(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            ..RetryConfig::default()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_retryable(&self, status: i32) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Time to wait before the retry that follows `attempt` (zero based). A
    /// 429 response telling us how many seconds to wait is honored, anything
    /// else grows exponentially. Both are capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32, response: Option<&Response>) -> Duration {
        if let Some(retry_after) = response.and_then(retry_after) {
            return retry_after.min(self.max_backoff);
        }
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let nanos = self.initial_backoff.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_backoff.as_nanos() as f64 {
            return self.max_backoff;
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}

// Only the delay-seconds form of Retry-After is supported.
fn retry_after(response: &Response) -> Option<Duration> {
    if response.status != TOO_MANY_REQUESTS {
        return None;
    }
    response
        .header(RETRY_AFTER)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: api_defaults::DEFAULT_MAX_RETRIES,
            initial_backoff: api_defaults::DEFAULT_INITIAL_BACKOFF,
            max_backoff: api_defaults::DEFAULT_MAX_BACKOFF,
            multiplier: api_defaults::DEFAULT_BACKOFF_MULTIPLIER,
            retryable_statuses: api_defaults::DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

/// Backoff wraps an HttpRunner and replays requests on transport failures or
/// retryable HTTP statuses with an exponential backoff retry mechanism. It is
/// an HttpRunner itself, so callers do not know retries are happening.
pub struct Backoff<R> {
    runner: Arc<R>,
    config: RetryConfig,
}

impl<R> Backoff<R> {
    pub fn new(runner: Arc<R>, config: RetryConfig) -> Self {
        Backoff { runner, config }
    }
}

impl<R: HttpRunner<Response = Response>> HttpRunner for Backoff<R> {
    type Response = Response;

    fn run(&self, request: &Request) -> Result<Self::Response> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;
        loop {
            match self.runner.run(request) {
                Ok(response) => {
                    if !self.config.is_retryable(response.status) {
                        return Ok(response);
                    }
                    if attempt >= max_retries {
                        log_warn!(
                            "{} {} still failing with status {} after {} attempts",
                            request.method,
                            request.url(),
                            response.status,
                            attempt + 1
                        );
                        return Ok(response);
                    }
                    let wait_time = self.config.backoff(attempt, Some(&response));
                    log_info!(
                        "Status {} from {}, retrying in {} ms",
                        response.status,
                        request.url(),
                        wait_time.as_millis()
                    );
                    // The response is dropped before sleeping, nobody reads
                    // the body of a retried response.
                    drop(response);
                    self.runner.throttle(wait_time);
                }
                Err(err) => {
                    if attempt >= max_retries {
                        return Err(err.context(BCError::RetriesExhausted {
                            attempts: attempt + 1,
                        }));
                    }
                    let wait_time = self.config.backoff(attempt, None);
                    log_info!(
                        "Request to {} failed: {}. Retrying in {} ms",
                        request.url(),
                        err,
                        wait_time.as_millis()
                    );
                    self.runner.throttle(wait_time);
                }
            }
            attempt += 1;
        }
    }

    fn throttle(&self, delay: Duration) {
        self.runner.throttle(delay)
    }
}
