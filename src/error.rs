use std::fmt::Display;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BCError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("HTTP transport error: {0}")]
    HttpTransportError(String),
    #[error("Request failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("Authentication failed, check your API token: {body}")]
    AuthenticationFailed { body: String },
    #[error("The {resource} was not found at {path}")]
    NotFound {
        resource: String,
        id: Option<String>,
        path: String,
        body: String,
    },
    #[error("API error - status: {status}, body: {body}")]
    ApiError { status: i32, body: String },
    #[error("Invalid {field}: {message}")]
    ValidationError { field: String, message: String },
    #[error("Malformed link header: {0}")]
    MalformedLinkHeader(String),
}

impl BCError {
    /// HTTP status of the response behind the error, if there was one.
    pub fn status(&self) -> Option<i32> {
        match self {
            BCError::AuthenticationFailed { .. } => Some(401),
            BCError::NotFound { .. } => Some(404),
            BCError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw body of the response behind the error, if there was one.
    pub fn body(&self) -> Option<&str> {
        match self {
            BCError::AuthenticationFailed { body }
            | BCError::NotFound { body, .. }
            | BCError::ApiError { body, .. } => Some(body),
            _ => None,
        }
    }
}

pub trait AddContext<T, E>: Context<T, E> {
    fn err_context<C: Display + Send + Sync + 'static>(self, msg: C) -> Result<T, anyhow::Error>
    where
        Self: Sized,
    {
        self.with_context(|| msg.to_string())
    }
}

impl<U, T, E> AddContext<T, E> for U where U: Context<T, E> {}

pub fn gen<T: AsRef<str>>(msg: T) -> anyhow::Error {
    anyhow!(msg.as_ref().to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_and_body_of_http_errors() {
        let err = BCError::AuthenticationFailed {
            body: "expired".to_string(),
        };
        assert_eq!(Some(401), err.status());
        assert_eq!(Some("expired"), err.body());
        let err = BCError::ApiError {
            status: 422,
            body: "invalid".to_string(),
        };
        assert_eq!(Some(422), err.status());
        assert_eq!(Some("invalid"), err.body());
    }

    #[test]
    fn test_non_http_errors_have_no_status() {
        let err = BCError::RetriesExhausted { attempts: 4 };
        assert_eq!(None, err.status());
        assert_eq!(None, err.body());
        assert_eq!("Request failed after 4 attempts", err.to_string());
    }
}
