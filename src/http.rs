pub mod ratelimit;

use crate::api_defaults;
use crate::error::BCError;
use crate::io::{HttpRunner, Response};
use crate::{log_debug, Result};
use std::collections::{hash_map, HashMap};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Performs HTTP exchanges against the remote using a blocking `ureq` agent.
/// Any HTTP status is reported back as a `Response`. Only transport level
/// failures (DNS, connection refused, timeouts) are errors.
pub struct Client {
    agent: ureq::Agent,
}

impl Client {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Client {
            agent: config.into(),
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new(api_defaults::HTTP_TIMEOUT)
    }
}

fn set_headers<B>(
    ureq_req: ureq::RequestBuilder<B>,
    headers: &Headers,
) -> ureq::RequestBuilder<B> {
    headers
        .iter()
        .fold(ureq_req, |req, (key, value)| {
            req.header(key.as_str(), value.as_str())
        })
}

impl HttpRunner for Client {
    type Response = Response;

    fn run(&self, request: &Request) -> Result<Self::Response> {
        log_debug!("{} {}", request.method, request.url());
        let headers = request.headers();
        let result = match (&request.method, request.body()) {
            (Method::GET, _) => set_headers(self.agent.get(request.url()), headers).call(),
            (Method::DELETE, None) => {
                set_headers(self.agent.delete(request.url()), headers).call()
            }
            (Method::DELETE, Some(body)) => {
                set_headers(self.agent.delete(request.url()), headers)
                    .force_send_body()
                    .send(body)
            }
            (Method::POST, Some(body)) => {
                set_headers(self.agent.post(request.url()), headers).send(body)
            }
            (Method::POST, None) => {
                set_headers(self.agent.post(request.url()), headers).send_empty()
            }
            (Method::PUT, Some(body)) => {
                set_headers(self.agent.put(request.url()), headers).send(body)
            }
            (Method::PUT, None) => set_headers(self.agent.put(request.url()), headers).send_empty(),
        };
        match result {
            Ok(mut response) => {
                let status = response.status().as_u16() as i32;
                // Grab headers for pagination and rate limiting.
                let headers =
                    response
                        .headers()
                        .iter()
                        .fold(Headers::new(), |mut headers, (name, value)| {
                            headers.append(name.as_str(), value.to_str().unwrap_or_default());
                            headers
                        });
                let body = response
                    .body_mut()
                    .read_to_string()
                    .map_err(|err| BCError::HttpTransportError(err.to_string()))?;
                let response = Response::builder()
                    .status(status)
                    .body(body)
                    .headers(headers)
                    .build()?;
                Ok(response)
            }
            Err(err) => Err(BCError::HttpTransportError(err.to_string()).into()),
        }
    }
}

/// Case insensitive HTTP headers. Names are stored in lowercase.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Headers(HashMap::new())
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.insert(key.into().to_lowercase(), value.into());
    }

    /// Adds a value to a header that may repeat, joining values with `, `
    /// as a single field would carry them.
    pub fn append<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let value = value.into();
        self.0
            .entry(key.into().to_lowercase())
            .and_modify(|current| {
                current.push_str(", ");
                current.push_str(&value);
            })
            .or_insert_with(|| value.clone());
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(&key.to_lowercase())
    }

    pub fn iter(&self) -> hash_map::Iter<String, String> {
        self.0.iter()
    }
}

#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned")]
pub struct Request {
    /// JSON payload, serialized once so retries send the exact same bytes.
    #[builder(setter(into, strip_option), default)]
    body: Option<Vec<u8>>,
    #[builder(default)]
    headers: Headers,
    #[builder(default)]
    pub method: Method,
    #[builder(setter(into))]
    url: String,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    pub fn new(url: &str, method: Method) -> Self {
        Request {
            body: None,
            headers: Headers::new(),
            method,
            url: url.to_string(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.set(key, value);
    }

    pub fn set_headers(&mut self, headers: Headers) {
        self.headers = headers;
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Method {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let method = match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
        };
        write!(f, "{}", method)
    }
}
