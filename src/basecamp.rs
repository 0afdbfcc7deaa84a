use crate::config::ConfigProperties;
use crate::error::{AddContext, BCError};
use crate::http::ratelimit::RateLimiter;
use crate::http::{Headers, Method, Request};
use crate::io::{HttpRunner, Response};
use crate::paginator::PaginatedRequest;
use crate::{api_defaults, log_debug, log_info, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

// https://github.com/basecamp/bc3-api

/// Base request client. Every request is authenticated, paced by the shared
/// rate limiter and sent through the runner, which in production is a
/// `Backoff` wrapping the network `Client`.
pub struct Basecamp<R> {
    api_token: String,
    account_id: String,
    rest_api_basepath: String,
    runner: Arc<R>,
    limiter: Arc<RateLimiter>,
    page_delay: Duration,
    strict_link_header: bool,
}

impl<R> Basecamp<R> {
    pub fn new(config: &impl ConfigProperties, runner: Arc<R>, limiter: Arc<RateLimiter>) -> Self {
        let account_id = config.account_id().to_string();
        let rest_api_basepath = format!(
            "{}/{}",
            config.base_url().trim_end_matches('/'),
            account_id
        );
        Basecamp {
            api_token: config.api_token().to_string(),
            account_id,
            rest_api_basepath,
            runner,
            limiter,
            page_delay: config.page_delay(),
            strict_link_header: config.strict_link_header(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn page_delay(&self) -> Duration {
        self.page_delay
    }

    pub fn strict_link_header(&self) -> bool {
        self.strict_link_header
    }

    /// Full URL for a path relative to the account, such as
    /// `/buckets/1/todolists/2/todos.json`.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.rest_api_basepath, path)
        } else {
            format!("{}/{}", self.rest_api_basepath, path)
        }
    }

    fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.set("Authorization", format!("Bearer {}", self.api_token));
        headers.set("Content-Type", "application/json; charset=utf-8");
        headers.set("User-Agent", api_defaults::USER_AGENT);
        headers
    }
}

impl<R: HttpRunner<Response = Response>> Basecamp<R> {
    /// Sends one request without asking the rate limiter for admission. The
    /// response headers recalibrate the limiter. Statuses >= 400 become
    /// errors.
    pub(crate) fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Response> {
        let mut request = Request::new(&self.url(path), method);
        request.set_headers(self.headers());
        if let Some(body) = body {
            request = request.with_body(body);
        }
        let response = self.runner.run(&request)?;
        let rate_limit_info = response.rate_limit_info();
        self.limiter.recalibrate(rate_limit_info.as_ref());
        if let Some(remaining) = rate_limit_info.and_then(|info| info.remaining) {
            let delay = self.limiter.proactive_delay(remaining as i64);
            if !delay.is_zero() {
                log_info!(
                    "Only {} requests left, slowing down for {} ms",
                    remaining,
                    delay.as_millis()
                );
                self.runner.throttle(delay);
            }
        }
        if response.status >= 400 {
            return Err(api_error(response, path).into());
        }
        Ok(response)
    }

    pub(crate) fn throttle(&self, delay: Duration) {
        self.runner.throttle(delay);
    }

    /// Performs a request and hands back the raw response. Use it when the
    /// response carries no JSON, like a 204 No Content.
    pub fn execute<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&B>,
    ) -> Result<Response> {
        let body = payload
            .map(serde_json::to_vec)
            .transpose()
            .err_context(format!("Failed to encode payload for {}", path))?;
        self.limiter.acquire();
        self.send(method, path, body)
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute::<()>(Method::GET, path, None)?;
        decode(&response, path)
    }

    pub fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        payload: Option<&B>,
    ) -> Result<T> {
        let response = self.execute(Method::POST, path, payload)?;
        decode(&response, path)
    }

    pub fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        payload: Option<&B>,
    ) -> Result<T> {
        let response = self.execute(Method::PUT, path, payload)?;
        decode(&response, path)
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.execute::<()>(Method::DELETE, path, None)?;
        Ok(())
    }

    /// Follows the Link headers starting at `path` and returns the items of
    /// every page in order.
    pub fn fetch_all_pages<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        PaginatedRequest::new(self).fetch_all(path)
    }

    /// Fetches a single page of a paginated endpoint.
    pub fn get_page<T: DeserializeOwned>(&self, path: &str, page: u32) -> Result<Vec<T>> {
        PaginatedRequest::new(self).fetch_page(path, page)
    }
}

/// Decodes a JSON body. An empty body decodes as `null`, so callers that do
/// not care about the response can ask for `()` or `Option<T>`.
pub(crate) fn decode<T: DeserializeOwned>(response: &Response, path: &str) -> Result<T> {
    let body = if response.body.trim().is_empty() {
        "null"
    } else {
        response.body.as_str()
    };
    serde_json::from_str(body).err_context(format!("Failed to decode response from {}", path))
}

fn api_error(response: Response, path: &str) -> BCError {
    log_debug!("{} returned status {}", path, response.status);
    match response.status {
        401 => BCError::AuthenticationFailed {
            body: response.body,
        },
        404 => {
            let (resource, id) = resource_from_path(path);
            BCError::NotFound {
                resource,
                id,
                path: path.to_string(),
                body: response.body,
            }
        }
        status => BCError::ApiError {
            status,
            body: response.body,
        },
    }
}

/// Best effort guess of the resource a path points to, used for not found
/// errors. `/buckets/1/todolists/2/todos.json` is a `todo`,
/// `/buckets/1/message_boards/3.json` is the `message board` with id `3`.
fn resource_from_path(path: &str) -> (String, Option<String>) {
    let path = path.split('?').next().unwrap_or_default();
    let mut segments = path
        .rsplit('/')
        .map(|segment| segment.trim_end_matches(".json"))
        .filter(|segment| !segment.is_empty())
        .peekable();
    let is_id = |segment: &str| segment.chars().all(|c| c.is_ascii_digit());
    let id = segments
        .next_if(|segment| is_id(segment))
        .map(|segment| segment.to_string());
    let resource = segments
        .find(|segment| !is_id(segment))
        .map(|segment| {
            let singular = if let Some(stem) = segment.strip_suffix("ies") {
                format!("{}y", stem)
            } else {
                segment.strip_suffix('s').unwrap_or(segment).to_string()
            };
            singular.replace('_', " ")
        })
        .unwrap_or_else(|| "resource".to_string());
    (resource, id)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::utils::{default_basecamp, ConfigMock, MockRunner};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Todo {
        id: i64,
        content: String,
    }

    fn ok_response(body: &str) -> Response {
        Response::builder().status(200).body(body).build().unwrap()
    }

    #[test]
    fn test_url_joins_base_account_and_path() {
        let client = Arc::new(MockRunner::new(vec![]));
        let basecamp = default_basecamp(client);
        assert_eq!(
            "https://3.basecampapi.com/999/projects.json",
            basecamp.url("/projects.json")
        );
        assert_eq!(
            "https://3.basecampapi.com/999/projects.json",
            basecamp.url("projects.json")
        );
    }

    #[test]
    fn test_get_sets_headers_and_decodes() {
        let client = Arc::new(MockRunner::new(vec![ok_response(
            r#"{"id": 1, "content": "Buy milk"}"#,
        )]));
        let basecamp = default_basecamp(client.clone());
        let todo: Todo = basecamp.get("/buckets/1/todos/1.json").unwrap();
        assert_eq!(
            Todo {
                id: 1,
                content: "Buy milk".to_string()
            },
            todo
        );
        assert_eq!(
            "https://3.basecampapi.com/999/buckets/1/todos/1.json",
            *client.url()
        );
        let headers = client.headers();
        assert_eq!("Bearer 1234", headers.get("Authorization").unwrap());
        assert_eq!(
            "application/json; charset=utf-8",
            headers.get("Content-Type").unwrap()
        );
        assert!(headers.get("User-Agent").unwrap().starts_with("bc-cli/"));
        assert_eq!(vec![Method::GET], *client.http_methods());
    }

    #[test]
    fn test_each_request_takes_a_token() {
        let client = Arc::new(MockRunner::new(vec![ok_response("[]"), ok_response("[]")]));
        let basecamp = default_basecamp(client);
        let _: Vec<Todo> = basecamp.get("/projects.json").unwrap();
        let _: Vec<Todo> = basecamp.get("/projects.json").unwrap();
        assert_eq!(48, basecamp.limiter().tokens());
    }

    #[test]
    fn test_post_serializes_payload() {
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(201)
            .body(r#"{"id": 7, "content": "Ship it"}"#)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client.clone());
        let payload = json!({"content": "Ship it"});
        let todo: Todo = basecamp
            .post("/buckets/1/todolists/2/todos.json", Some(&payload))
            .unwrap();
        assert_eq!(7, todo.id);
        assert_eq!(r#"{"content":"Ship it"}"#, client.request_bodies()[0]);
        assert_eq!(vec![Method::POST], *client.http_methods());
    }

    #[test]
    fn test_put_with_empty_response() {
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(204)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client.clone());
        let payload = json!({"content": "Updated"});
        let result: Option<Todo> = basecamp
            .put("/buckets/1/todos/7.json", Some(&payload))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(vec![Method::PUT], *client.http_methods());
    }

    #[test]
    fn test_delete() {
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(204)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client.clone());
        basecamp.delete("/buckets/1/recordings/7/status/trashed.json").unwrap();
        assert_eq!(vec![Method::DELETE], *client.http_methods());
        assert!(client.request_bodies()[0].is_empty());
    }

    #[test]
    fn test_unauthorized_is_authentication_error() {
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(401)
            .body("Bad token")
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client);
        let err = basecamp.get::<Todo>("/projects.json").unwrap_err();
        match err.downcast_ref::<BCError>() {
            Some(BCError::AuthenticationFailed { body }) => assert_eq!("Bad token", body),
            _ => panic!("Expected authentication error, got {:?}", err),
        }
    }

    #[test]
    fn test_not_found_infers_resource() {
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(404)
            .body(r#"{"status":404,"error":"Not Found"}"#)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client);
        let err = basecamp.get::<Todo>("/buckets/1/todos/99.json").unwrap_err();
        let bc_err = err.downcast_ref::<BCError>().unwrap();
        match bc_err {
            BCError::NotFound {
                resource,
                id,
                path,
                body,
            } => {
                assert_eq!("todo", resource);
                assert_eq!(Some("99"), id.as_deref());
                assert_eq!("/buckets/1/todos/99.json", path);
                assert!(body.contains("Not Found"));
            }
            _ => panic!("Expected not found error, got {:?}", err),
        }
        assert_eq!(Some(404), bc_err.status());
        assert_eq!(Some(r#"{"status":404,"error":"Not Found"}"#), bc_err.body());
    }

    #[test]
    fn test_other_status_is_api_error() {
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(422)
            .body(r#"{"error":"content can't be blank"}"#)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client);
        let err = basecamp
            .post::<_, Todo>("/buckets/1/todolists/2/todos.json", Some(&json!({})))
            .unwrap_err();
        match err.downcast_ref::<BCError>() {
            Some(BCError::ApiError { status, body }) => {
                assert_eq!(422, *status);
                assert!(body.contains("blank"));
            }
            _ => panic!("Expected api error, got {:?}", err),
        }
    }

    #[test]
    fn test_decode_error_is_reported() {
        let client = Arc::new(MockRunner::new(vec![ok_response("<html>oops</html>")]));
        let basecamp = default_basecamp(client);
        let err = basecamp.get::<Todo>("/projects.json").unwrap_err();
        assert!(err.to_string().contains("Failed to decode response from /projects.json"));
    }

    #[test]
    fn test_response_recalibrates_limiter() {
        let mut headers = Headers::new();
        headers.set("X-RateLimit-Remaining", "20");
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(200)
            .body("[]")
            .headers(headers)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client.clone());
        let _: Vec<Todo> = basecamp.get("/projects.json").unwrap();
        assert_eq!(20, basecamp.limiter().tokens());
        assert!(client.throttled().is_empty());
    }

    #[test]
    fn test_low_remaining_slows_down() {
        let mut headers = Headers::new();
        headers.set("X-RateLimit-Remaining", "1");
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(200)
            .body("[]")
            .headers(headers)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client.clone());
        let _: Vec<Todo> = basecamp.get("/projects.json").unwrap();
        assert_eq!(vec![Duration::from_millis(1000)], *client.throttled());
    }

    #[test]
    fn test_custom_base_url() {
        let client = Arc::new(MockRunner::new(vec![]));
        let config = ConfigMock::new().with_base_url("http://localhost:8080/");
        let basecamp = Basecamp::new(&config, client, Arc::new(RateLimiter::default()));
        assert_eq!("http://localhost:8080/999/people.json", basecamp.url("/people.json"));
    }

    #[test]
    fn test_resource_from_path() {
        let resource = |path| resource_from_path(path);
        assert_eq!(
            ("todo".to_string(), None),
            resource("/buckets/1/todolists/2/todos.json")
        );
        assert_eq!(
            ("todo".to_string(), Some("3".to_string())),
            resource("/buckets/1/todos/3.json?page=2")
        );
        assert_eq!(
            ("card table".to_string(), Some("3".to_string())),
            resource("/buckets/1/card_tables/3.json")
        );
        assert_eq!(("category".to_string(), None), resource("/categories.json"));
        assert_eq!(
            ("project".to_string(), Some("123".to_string())),
            resource("/projects/123.json")
        );
        assert_eq!(
            ("resource".to_string(), Some("123".to_string())),
            resource("/123.json")
        );
    }

    #[test]
    fn test_huge_retry_after_does_not_panic() {
        let mut headers = Headers::new();
        headers.set("Retry-After", "9223372036854775807");
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(200)
            .body("[]")
            .headers(headers)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client);
        let todos: Vec<Todo> = basecamp.get("/projects.json").unwrap();
        assert!(todos.is_empty());
        assert_eq!(0, basecamp.limiter().tokens());
    }

    #[test]
    fn test_zero_retry_after_keeps_remaining() {
        let mut headers = Headers::new();
        headers.set("Retry-After", "0");
        headers.set("X-RateLimit-Remaining", "10");
        let client = Arc::new(MockRunner::new(vec![Response::builder()
            .status(200)
            .body("[]")
            .headers(headers)
            .build()
            .unwrap()]));
        let basecamp = default_basecamp(client);
        let _: Vec<Todo> = basecamp.get("/projects.json").unwrap();
        assert_eq!(10, basecamp.limiter().tokens());
    }
}
