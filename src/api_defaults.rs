use std::time::Duration;

// https://github.com/basecamp/bc3-api#base-url
pub const BASE_URL: &str = "https://3.basecampapi.com";

pub const USER_AGENT: &str = concat!("bc-cli/", env!("CARGO_PKG_VERSION"));

// https://github.com/basecamp/bc3-api#rate-limiting-429-too-many-requests
// 50 requests per 10 second period per IP address.
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 50;
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

// Once the server reports this many remaining requests or fewer we start
// slowing down on our own, one step per request under the threshold.
pub const PROACTIVE_DELAY_THRESHOLD: u32 = 5;
pub const PROACTIVE_DELAY_STEP: Duration = Duration::from_millis(200);

// Pause in between page fetches when following Link headers.
pub const PAGE_DELAY: Duration = Duration::from_millis(100);

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_RETRYABLE_STATUSES: [i32; 5] = [429, 500, 502, 503, 504];

// Longest Retry-After the rate limiter honors. Anything above is clamped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_PROFILE: &str = "default";
