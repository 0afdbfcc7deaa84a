//! Link header pagination.
//!
//! List endpoints return a page of results plus a `Link` header pointing to
//! the next page:
//!
//! ```text
//! Link: <https://3.basecampapi.com/999/buckets/1/todolists/2/todos.json?page=2>; rel="next"
//! ```
//!
//! `PaginatedRequest` keeps following `rel="next"` until the server stops
//! advertising one, accumulating every page into a single collection.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use url::Url;

use crate::basecamp::{decode, Basecamp};
use crate::error::{AddContext, BCError};
use crate::http::ratelimit::RateLimiter;
use crate::http::Method;
use crate::io::{next_link, parse_link_header, HttpRunner, Response};
use crate::{log_debug, log_info, log_warn, Result};

/// Binds a client and the shared rate limiter for one fetch.
pub struct PaginatedRequest<'a, R> {
    client: &'a Basecamp<R>,
    limiter: Arc<RateLimiter>,
}

impl<'a, R> PaginatedRequest<'a, R> {
    pub fn new(client: &'a Basecamp<R>) -> Self {
        PaginatedRequest {
            client,
            limiter: client.limiter().clone(),
        }
    }
}

impl<'a, R: HttpRunner<Response = Response>> PaginatedRequest<'a, R> {
    /// Fetches every page starting at `path`. Any failing page fails the
    /// whole fetch and the items gathered so far are dropped.
    pub fn fetch_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut results = Vec::new();
        let mut current_path = Some(path.to_string());
        let mut page = 0;
        while let Some(page_path) = current_path.take() {
            page += 1;
            self.limiter.acquire();
            let response = self
                .client
                .send(Method::GET, &page_path, None)
                .err_context(format!("Failed to fetch page {} of {}", page, path))?;
            let items: Vec<T> = decode(&response, &page_path)
                .err_context(format!("Failed to decode page {} of {}", page, path))?;
            if items.is_empty() {
                // A well behaved server does not link to empty pages. Stop
                // in case it does so we never loop forever.
                log_debug!("Page {} of {} is empty, stopping", page, path);
                break;
            }
            log_debug!("Page {} of {} has {} items", page, path, items.len());
            results.extend(items);
            current_path = self.next_path(&response)?;
            if current_path.is_some() {
                self.client.throttle(self.client.page_delay());
            }
        }
        log_info!(
            "Fetched {} items in {} pages from {}",
            results.len(),
            page,
            path
        );
        Ok(results)
    }

    /// Fetches one explicit page, without following links.
    pub fn fetch_page<T: DeserializeOwned>(&self, path: &str, page: u32) -> Result<Vec<T>> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let page_path = format!("{}{}page={}", path, separator, page);
        self.limiter.acquire();
        let response = self.client.send(Method::GET, &page_path, None)?;
        decode(&response, &page_path)
    }

    fn next_path(&self, response: &Response) -> Result<Option<String>> {
        let Some(link) = response.link_header() else {
            return Ok(None);
        };
        match next_link(link) {
            Some(url) => {
                let path = url_to_path(&url);
                if path.is_empty() {
                    return self.malformed(link);
                }
                Ok(Some(path))
            }
            None if parse_link_header(link).is_empty() => self.malformed(link),
            None => Ok(None),
        }
    }

    fn malformed(&self, link: &str) -> Result<Option<String>> {
        if self.client.strict_link_header() {
            return Err(BCError::MalformedLinkHeader(link.to_string()).into());
        }
        log_warn!(
            "Cannot follow Link header {:?}, results might be incomplete",
            link
        );
        Ok(None)
    }
}

/// Converts an absolute API URL into a path relative to the account, so
/// `https://3.basecampapi.com/999/buckets/1/todos.json?page=2` becomes
/// `/buckets/1/todos.json?page=2`. Relative paths are returned untouched and
/// anything that is not a URL gives an empty string.
pub fn url_to_path(url: &str) -> String {
    if url.starts_with('/') {
        return url.to_string();
    }
    let parsed = match Url::parse(url) {
        Ok(parsed) if !parsed.cannot_be_a_base() => parsed,
        _ => return String::new(),
    };
    let path = match parsed.path().trim_start_matches('/').split_once('/') {
        Some((_account_id, rest)) => format!("/{}", rest),
        None => "/".to_string(),
    };
    match parsed.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    }
}
