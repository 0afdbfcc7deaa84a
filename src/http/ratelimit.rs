//! Token bucket that keeps the client under the remote API request budget.
//!
//! One instance is shared by every request the process makes. Tokens refill
//! lazily based on elapsed time, and the bucket is recalibrated with what the
//! server reports in its rate limit headers so we follow the server's view of
//! the budget instead of drifting from it.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::{
    api_defaults, config::ConfigProperties, io::RateLimitInfo, log_debug, log_info, log_warn,
};

struct Bucket {
    tokens: u32,
    max_tokens: u32,
    // Time it takes to earn one token.
    refill_rate: Duration,
    last_refill: Instant,
    debug: bool,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = elapsed.as_nanos() / self.refill_rate.as_nanos().max(1);
        if earned == 0 {
            return;
        }
        let tokens = (self.tokens as u128 + earned).min(self.max_tokens as u128) as u32;
        if tokens == self.max_tokens {
            self.last_refill = now;
        } else {
            // Keep the fraction of a token earned so far.
            self.last_refill += self.refill_rate * earned as u32;
        }
        self.tokens = tokens;
    }

    fn next_token_in(&self, now: Instant) -> Duration {
        (self.last_refill + self.refill_rate).saturating_duration_since(now)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimiterSnapshot {
    pub tokens: u32,
    pub max_tokens: u32,
    pub refill_rate: Duration,
}

pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    // Window the budget applies to. Fixed for the lifetime of the limiter,
    // changes in the reported limit only change the refill rate.
    window: Duration,
    proactive_threshold: u32,
    proactive_step: Duration,
}

impl RateLimiter {
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        let max_tokens = max_tokens.max(1);
        RateLimiter {
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                max_tokens,
                refill_rate: window / max_tokens,
                last_refill: Instant::now(),
                debug: false,
            }),
            window,
            proactive_threshold: api_defaults::PROACTIVE_DELAY_THRESHOLD,
            proactive_step: api_defaults::PROACTIVE_DELAY_STEP,
        }
    }

    pub fn with_config(config: &impl ConfigProperties) -> Self {
        RateLimiter::new(config.rate_limit_requests(), config.rate_limit_window())
            .with_proactive_delay(
                config.proactive_delay_threshold(),
                config.proactive_delay_step(),
            )
    }

    pub fn with_proactive_delay(mut self, threshold: u32, step: Duration) -> Self {
        self.proactive_threshold = threshold;
        self.proactive_step = step;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        // The bucket only holds counters, a panicking holder cannot leave
        // it in a state worse than stale.
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes one token, sleeping until one is available. The lock is released
    /// while sleeping so other callers are not blocked by our wait.
    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.lock();
                let now = Instant::now();
                bucket.refill(now);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    Self::log_admission(&bucket);
                    return;
                }
                bucket.next_token_in(now)
            };
            log_debug!(
                "Rate limit budget exhausted, waiting {} ms for the next token",
                wait.as_millis()
            );
            thread::sleep(wait);
        }
    }

    /// Takes one token if available without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        Self::log_admission(&bucket);
        true
    }

    fn log_admission(bucket: &Bucket) {
        if bucket.debug {
            log_info!(
                "Request admitted, {}/{} tokens left",
                bucket.tokens,
                bucket.max_tokens
            );
        } else {
            log_debug!(
                "Request admitted, {}/{} tokens left",
                bucket.tokens,
                bucket.max_tokens
            );
        }
    }

    /// Adjusts the bucket with the rate limit headers of a response. A
    /// retry-after hint wins over the remaining count of the same response.
    pub fn recalibrate(&self, info: Option<&RateLimitInfo>) {
        let Some(info) = info else {
            return;
        };
        let mut bucket = self.lock();
        let now = Instant::now();
        bucket.refill(now);
        if let Some(limit) = info.limit {
            if limit > 0 && limit != bucket.max_tokens {
                log_info!(
                    "Rate limit changed from {} to {} requests",
                    bucket.max_tokens,
                    limit
                );
                bucket.max_tokens = limit;
                bucket.refill_rate = self.window / limit;
                bucket.tokens = bucket.tokens.min(limit);
            }
        }
        // Retry-After: 0 means no wait, the remaining count still applies.
        if let Some(retry_after) = info.retry_after.filter(|seconds| **seconds > 0) {
            log_info!("Server asked to retry after {} seconds", retry_after);
            let mut wait = Duration::from(retry_after);
            if wait > api_defaults::MAX_RETRY_AFTER {
                log_warn!(
                    "Retry-After of {} seconds is too long, waiting {} seconds instead",
                    retry_after,
                    api_defaults::MAX_RETRY_AFTER.as_secs()
                );
                wait = api_defaults::MAX_RETRY_AFTER;
            }
            bucket.tokens = 0;
            // Next token becomes available once the wait has elapsed.
            let resume_at = now.checked_add(wait).unwrap_or(now);
            bucket.last_refill = resume_at.checked_sub(bucket.refill_rate).unwrap_or(now);
        } else if let Some(remaining) = info.remaining {
            bucket.tokens = remaining.min(bucket.max_tokens);
        }
    }

    /// Voluntary pause when the server reports we are running low on
    /// requests. Zero above the threshold, growing one step per request below
    /// it and largest when nothing is left.
    pub fn proactive_delay(&self, remaining: i64) -> Duration {
        let remaining = remaining.max(0) as u64;
        let threshold = self.proactive_threshold as u64;
        if remaining > threshold {
            return Duration::ZERO;
        }
        let steps = (threshold - remaining + 1).min(u32::MAX as u64) as u32;
        self.proactive_step * steps
    }

    /// Refills the bucket to its ceiling.
    pub fn reset(&self) {
        let mut bucket = self.lock();
        bucket.tokens = bucket.max_tokens;
        bucket.last_refill = Instant::now();
    }

    pub fn tokens(&self) -> u32 {
        self.lock().tokens
    }

    pub fn max_tokens(&self) -> u32 {
        self.lock().max_tokens
    }

    pub fn debug(&self) -> bool {
        self.lock().debug
    }

    pub fn set_debug(&self, debug: bool) {
        self.lock().debug = debug;
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let bucket = self.lock();
        RateLimiterSnapshot {
            tokens: bucket.tokens,
            max_tokens: bucket.max_tokens,
            refill_rate: bucket.refill_rate,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new(
            api_defaults::DEFAULT_RATE_LIMIT_REQUESTS,
            api_defaults::DEFAULT_RATE_LIMIT_WINDOW,
        )
    }
}
