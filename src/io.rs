use crate::{
    http::{Headers, Request},
    log_debug, log_warn,
    time::{self, Seconds},
    Result,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    thread,
    time::Duration,
};

/// A trait for the HTTP protocol. Implementors perform one HTTP exchange per
/// `run` call. They can do HTTP calls against a remote server, decorate
/// another runner (retries) or mock the responses for testing purposes.
/// Implementors must report any HTTP status as a response; errors are
/// reserved for exchanges that did not produce one.
pub trait HttpRunner {
    type Response;
    fn run(&self, request: &Request) -> Result<Self::Response>;
    /// Wait before executing the next request. Every pause in between
    /// requests goes through here.
    fn throttle(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        log_debug!("Sleeping for {} milliseconds", delay.as_millis());
        thread::sleep(delay);
    }
}

/// Adapts lower level HTTP outputs to a common Response.
#[derive(Clone, Debug, Builder)]
pub struct Response {
    #[builder(default)]
    pub status: i32,
    #[builder(setter(into), default)]
    pub body: String,
    #[builder(default)]
    pub headers: Headers,
}

impl Response {
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    pub fn is_ok(&self) -> bool {
        self.status >= 200 && self.status < 400
    }

    pub fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        parse_ratelimit_headers(&self.headers)
    }

    pub fn link_header(&self) -> Option<&str> {
        self.header(LINK_HEADER)
    }
}

// https://github.com/basecamp/bc3-api#rate-limiting-429-too-many-requests
// Internal processing is all in lowercase.

// Time to wait before retrying the next request - standard common header
pub const RETRY_AFTER: &str = "retry-after";
pub const RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
// Unix time-formatted time when the request quota is reset.
pub const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Snapshot of the rate limit headers of one HTTP response. Every field is
/// optional: `remaining: Some(0)` means the server told us we are out of
/// requests, `None` means it did not say anything.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RateLimitInfo {
    // Total number of requests allowed in the current window.
    pub limit: Option<u32>,
    // The number of requests remaining in the current window.
    pub remaining: Option<u32>,
    pub reset: Option<DateTime<Utc>>,
    pub retry_after: Option<Seconds>,
}

impl RateLimitInfo {
    fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset.is_none()
            && self.retry_after.is_none()
    }
}

/// Parses the rate limit headers. Returns `None` if none of them was present
/// with a valid value. Negative or garbage values are logged and dropped so
/// they never reach the rate limiter.
pub fn parse_ratelimit_headers(headers: &Headers) -> Option<RateLimitInfo> {
    let info = RateLimitInfo {
        limit: header_number(headers, RATELIMIT_LIMIT),
        remaining: header_number(headers, RATELIMIT_REMAINING),
        reset: header_number::<u64>(headers, RATELIMIT_RESET).and_then(time::epoch_to_datetime),
        retry_after: header_number(headers, RETRY_AFTER).map(Seconds::new),
    };
    if info.is_empty() {
        return None;
    }
    log_debug!("Header {}", info);
    Some(info)
}

fn header_number<T: TryFrom<i64>>(headers: &Headers, name: &str) -> Option<T> {
    let value = headers.get(name)?;
    match value.trim().parse::<i64>() {
        Ok(number) if number < 0 => {
            log_warn!("Ignoring negative value {} in header {}", number, name);
            None
        }
        Ok(number) => match T::try_from(number) {
            Ok(number) => Some(number),
            Err(_) => {
                log_warn!("Ignoring out of range value {} in header {}", number, name);
                None
            }
        },
        Err(_) => {
            log_warn!("Ignoring invalid value {:?} in header {}", value, name);
            None
        }
    }
}

impl Display for RateLimitInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn or_unknown<T: Display>(value: Option<T>) -> String {
            value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "RateLimitInfo: limit: {}, remaining: {}, reset in: {} seconds, retry after: {} seconds",
            or_unknown(self.limit),
            or_unknown(self.remaining),
            or_unknown(self.reset.as_ref().map(time::seconds_until)),
            or_unknown(self.retry_after),
        )
    }
}

pub const LINK_HEADER: &str = "link";
const NEXT: &str = "next";

/// One entry of a Link header (RFC 5988). Parameter names are lowercase and
/// values come without their surrounding quotes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinkEntry {
    pub url: String,
    pub params: HashMap<String, String>,
}

impl LinkEntry {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// `rel` can hold several space separated relation types.
    pub fn has_rel(&self, rel: &str) -> bool {
        self.param("rel")
            .map(|rels| rels.split_whitespace().any(|r| r.eq_ignore_ascii_case(rel)))
            .unwrap_or(false)
    }
}

/// Parses all entries of a Link header. Anything that does not look like
/// `<url>; param=value` is skipped, so a malformed header gives back an empty
/// list.
pub fn parse_link_header(link: &str) -> Vec<LinkEntry> {
    lazy_static! {
        static ref RE_LINK: Regex =
            Regex::new(r#"<([^>]*)>((?:\s*;\s*[^;,=\s]+(?:\s*=\s*(?:"[^"]*"|[^;,]*))?)*)"#)
                .unwrap();
        static ref RE_PARAM: Regex =
            Regex::new(r#";\s*([^;,=\s]+)(?:\s*=\s*(?:"([^"]*)"|([^;,]*)))?"#).unwrap();
    }
    RE_LINK
        .captures_iter(link)
        .map(|cap| {
            let params = RE_PARAM
                .captures_iter(&cap[2])
                .map(|param| {
                    let value = param
                        .get(2)
                        .or_else(|| param.get(3))
                        .map(|v| v.as_str().trim().to_string())
                        .unwrap_or_default();
                    (param[1].to_lowercase(), value)
                })
                .collect();
            LinkEntry {
                url: cap[1].trim().to_string(),
                params,
            }
        })
        .collect()
}

/// URL of the first entry whose relation types include `next`.
pub fn next_link(link: &str) -> Option<String> {
    parse_link_header(link)
        .into_iter()
        .find(|entry| entry.has_rel(NEXT))
        .map(|entry| entry.url)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::utils::{init_test_logger, LOG_BUFFER};

    #[test]
    fn test_get_rate_limit_headers() {
        let mut headers = Headers::new();
        headers.set("X-RateLimit-Limit", "50");
        headers.set("x-ratelimit-remaining", "30");
        headers.set("x-ratelimit-reset", "1658602270");
        headers.set("retry-after", "60");
        let response = Response::builder()
            .body("responsebody")
            .headers(headers)
            .build()
            .unwrap();
        let info = response.rate_limit_info().unwrap();
        assert_eq!(Some(50), info.limit);
        assert_eq!(Some(30), info.remaining);
        assert_eq!(1658602270, info.reset.unwrap().timestamp());
        assert_eq!(Some(Seconds::new(60)), info.retry_after);
    }

    #[test]
    fn test_remaining_zero_is_reported() {
        let mut headers = Headers::new();
        headers.set("X-RateLimit-Remaining", "0");
        let info = parse_ratelimit_headers(&headers).unwrap();
        assert_eq!(Some(0), info.remaining);
        assert_eq!(None, info.limit);
        assert_eq!(None, info.retry_after);
    }

    #[test]
    fn test_no_rate_limit_headers_is_none() {
        let mut headers = Headers::new();
        headers.set("content-type", "application/json");
        assert!(parse_ratelimit_headers(&headers).is_none());
    }

    #[test]
    fn test_negative_values_are_dropped_and_logged() {
        init_test_logger();
        let mut headers = Headers::new();
        headers.set("x-ratelimit-remaining", "-3");
        headers.set("x-ratelimit-limit", "50");
        let info = parse_ratelimit_headers(&headers).unwrap();
        assert_eq!(None, info.remaining);
        assert_eq!(Some(50), info.limit);
        let buffer = LOG_BUFFER.lock().unwrap();
        assert!(buffer.contains("Ignoring negative value -3 in header x-ratelimit-remaining"));
    }

    #[test]
    fn test_only_invalid_values_is_none() {
        let mut headers = Headers::new();
        headers.set("x-ratelimit-remaining", "-1");
        headers.set("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT");
        headers.set("x-ratelimit-limit", "lots");
        assert!(parse_ratelimit_headers(&headers).is_none());
    }

    #[test]
    fn test_link_header_has_next_and_first() {
        let link = r#"<https://host/acct/path?page=2>; rel="next", <https://host/acct/path?page=1>; rel="first""#;
        assert_eq!(
            Some("https://host/acct/path?page=2".to_string()),
            next_link(link)
        );
        let entries = parse_link_header(link);
        assert_eq!(2, entries.len());
        assert_eq!(Some("first"), entries[1].param("rel"));
    }

    #[test]
    fn test_link_header_has_no_next_page() {
        let link = r#"<https://host/acct/path?page=1>; rel="first", <https://host/acct/path?page=9>; rel="last""#;
        assert_eq!(None, next_link(link));
    }

    #[test]
    fn test_link_header_unquoted_rel() {
        let link = "<https://host/acct/path?page=3>; rel=next";
        assert_eq!(
            Some("https://host/acct/path?page=3".to_string()),
            next_link(link)
        );
    }

    #[test]
    fn test_link_header_rel_case_insensitive_and_multi_value() {
        let link = r#"<https://host/acct/a?page=2>; REL="prefetch NEXT""#;
        assert_eq!(
            Some("https://host/acct/a?page=2".to_string()),
            next_link(link)
        );
    }

    #[test]
    fn test_link_header_quoted_values_with_commas() {
        let link = r#"<https://host/acct/a?page=1>; title="one, two"; rel="prev" ,  <https://host/acct/a?page=3> ;  title="three, four" ; rel = "next""#;
        let entries = parse_link_header(link);
        assert_eq!(2, entries.len());
        assert_eq!(Some("one, two"), entries[0].param("title"));
        assert_eq!(Some("three, four"), entries[1].param("title"));
        assert_eq!(
            Some("https://host/acct/a?page=3".to_string()),
            next_link(link)
        );
    }

    #[test]
    fn test_malformed_link_header_has_no_next() {
        assert_eq!(None, next_link("https://host/acct/a?page=2; rel=next"));
        assert_eq!(None, next_link("<https://host/acct/a?page=2"));
        assert_eq!(None, next_link(""));
        assert!(parse_link_header(";;,,<>").iter().all(|e| !e.has_rel("next")));
    }

    #[test]
    fn test_response_is_ok() {
        assert!(Response::builder().status(200).build().unwrap().is_ok());
        assert!(Response::builder().status(204).build().unwrap().is_ok());
        for status in 400..=599 {
            assert!(!Response::builder().status(status).build().unwrap().is_ok());
        }
    }
}
