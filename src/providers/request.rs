//! Single logical API call: per-attempt timeout, immediate retries on 5xx
//! and aborts, and classification of whatever failure is left.

use crate::core::errors::ErrorCategory;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "API-Key";
const RATE_LIMIT_RESET_HEADER: &str = "RateLimit-Reset";

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request to {url} aborted: {message}")]
    Abort { url: String, message: String },

    #[error("rate limited by {url}: {}", .cause.as_deref().unwrap_or("no cause given"))]
    RateLimit {
        url: String,
        cause: Option<String>,
        global: bool,
        throttle: bool,
        reset: Option<Duration>,
        body: Option<Value>,
    },

    #[error("{url} returned {status} {status_text}")]
    Http {
        url: String,
        status: u16,
        status_text: String,
        body: Option<Value>,
    },

    #[error("{0}")]
    Generic(String),
}

impl RequestError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RequestError::Abort { .. } => ErrorCategory::Abort,
            RequestError::RateLimit { .. } => ErrorCategory::RateLimit,
            RequestError::Http { .. } => ErrorCategory::Http,
            RequestError::Generic(_) => ErrorCategory::Generic,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            RequestError::Abort { url, .. }
            | RequestError::RateLimit { url, .. }
            | RequestError::Http { url, .. } => Some(url),
            RequestError::Generic(_) => None,
        }
    }
}

enum Attempt {
    Done(ApiResponse),
    Retry(RequestError),
    Fail(RequestError),
}

#[derive(Clone)]
pub struct RequestClient {
    client: Client,
    api_key: String,
}

impl RequestClient {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    /// Total attempts are `retry_limit + 1`. No delay is added between
    /// retries.
    pub async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        retry_limit: u32,
    ) -> Result<ApiResponse, RequestError> {
        let max_attempts = retry_limit.saturating_add(1);
        let mut attempt = 1;

        loop {
            debug!(url, attempt, max_attempts, "Sending request");

            let error = match tokio::time::timeout(timeout, self.attempt(url)).await {
                Ok(Attempt::Done(response)) => return Ok(response),
                Ok(Attempt::Fail(error)) => return Err(error),
                Ok(Attempt::Retry(error)) => error,
                Err(_) => RequestError::Abort {
                    url: url.to_string(),
                    message: format!("no response within {}ms", timeout.as_millis()),
                },
            };

            if attempt >= max_attempts {
                return Err(error);
            }

            warn!(url, attempt, max_attempts, error = %error, "Retrying request");
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let response = match self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Attempt::Retry(RequestError::Abort {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                return Attempt::Fail(RequestError::Generic(format!(
                    "request to {url} failed: {e}"
                )))
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if e.is_timeout() => {
                return Attempt::Retry(RequestError::Abort {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) if status.is_server_error() => {
                debug!(url, error = %e, "Failed to read server error body");
                return Attempt::Retry(RequestError::Http {
                    url: url.to_string(),
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or("").to_string(),
                    body: None,
                });
            }
            Err(e) => {
                return Attempt::Fail(RequestError::Generic(format!(
                    "failed to read response from {url}: {e}"
                )))
            }
        };
        let body = serde_json::from_str::<Value>(&text).ok();

        if status.is_success() {
            return match body {
                Some(body) => Attempt::Done(ApiResponse { status, body }),
                None => Attempt::Fail(RequestError::Generic(format!(
                    "{url} returned a body that is not JSON"
                ))),
            };
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::Fail(rate_limit_error(url, &headers, body));
        }

        let error = RequestError::Http {
            url: url.to_string(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body,
        };

        if status.is_server_error() {
            Attempt::Retry(error)
        } else {
            Attempt::Fail(error)
        }
    }
}

fn rate_limit_error(url: &str, headers: &HeaderMap, body: Option<Value>) -> RequestError {
    let flag = |name: &str| {
        body.as_ref()
            .and_then(|b| b.get(name))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };

    RequestError::RateLimit {
        url: url.to_string(),
        cause: body
            .as_ref()
            .and_then(|b| b.get("cause"))
            .and_then(Value::as_str)
            .map(str::to_string),
        global: flag("global"),
        throttle: flag("throttle"),
        reset: parse_reset(headers),
        body,
    }
}

/// Seconds until the key's window resets, from `RateLimit-Reset` or
/// `Retry-After`.
fn parse_reset(headers: &HeaderMap) -> Option<Duration> {
    [RATE_LIMIT_RESET_HEADER, "Retry-After"]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value: &HeaderValue| value.to_str().ok())
        .find_map(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn client() -> RequestClient {
        RequestClient::new(Client::new(), "test-key")
    }

    #[tokio::test]
    async fn test_success_returns_parsed_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/player")
            .match_header("API-Key", "test-key")
            .with_status(200)
            .with_body(r#"{"success":true,"player":null}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/player", server.url());
        let response = client().fetch(&url, TIMEOUT, 2).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["success"], Value::Bool(true));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/player")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/player")
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/player", server.url());
        let response = client().fetch(&url, TIMEOUT, 2).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_into_http_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/player")
            .with_status(503)
            .with_body(r#"{"success":false,"cause":"maintenance"}"#)
            .expect(3)
            .create_async()
            .await;

        let url = format!("{}/player", server.url());
        let err = client().fetch(&url, TIMEOUT, 2).await.unwrap_err();

        match &err {
            RequestError::Http { status, body, .. } => {
                assert_eq!(*status, 503);
                assert_eq!(body.as_ref().unwrap()["cause"], "maintenance");
            }
            other => panic!("expected http error, got {other:?}"),
        }
        assert_eq!(err.category(), ErrorCategory::Http);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/player")
            .with_status(429)
            .with_header("RateLimit-Reset", "17")
            .with_body(r#"{"success":false,"cause":"Key throttle","throttle":true,"global":true}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/player", server.url());
        let err = client().fetch(&url, TIMEOUT, 5).await.unwrap_err();

        match &err {
            RequestError::RateLimit {
                cause,
                global,
                throttle,
                reset,
                ..
            } => {
                assert_eq!(cause.as_deref(), Some("Key throttle"));
                assert!(*global);
                assert!(*throttle);
                assert_eq!(*reset, Some(Duration::from_secs(17)));
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
        assert_eq!(err.category(), ErrorCategory::RateLimit);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/player")
            .with_status(403)
            .with_body(r#"{"success":false,"cause":"Invalid API key"}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/player", server.url());
        let err = client().fetch(&url, TIMEOUT, 3).await.unwrap_err();

        match &err {
            RequestError::Http {
                status,
                status_text,
                url: failed_url,
                ..
            } => {
                assert_eq!(*status, 403);
                assert_eq!(status_text, "Forbidden");
                assert_eq!(failed_url, &url);
            }
            other => panic!("expected http error, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_json_success_is_generic() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/player")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let url = format!("{}/player", server.url());
        let err = client().fetch(&url, TIMEOUT, 0).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Generic);
    }

    #[tokio::test]
    async fn test_timeouts_retry_then_abort() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let url = format!("http://{addr}/player");
        let err = client()
            .fetch(&url, Duration::from_millis(100), 1)
            .await
            .unwrap_err();

        match &err {
            RequestError::Abort { url: failed_url, message } => {
                assert_eq!(failed_url, &url);
                assert!(message.contains("100ms"));
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(err.category(), ErrorCategory::Abort);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_then_success_retries_without_delay() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut socket, _)) = listener.accept().await {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    held.push(socket);
                    continue;
                }

                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let body = r#"{"success":true}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        let url = format!("http://{addr}/player");
        let start = std::time::Instant::now();
        let response = client()
            .fetch(&url, Duration::from_millis(200), 1)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(response.body["success"], Value::Bool(true));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_truncated_server_error_body_is_retried() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response =
                    "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 100\r\n\r\n{\"succ";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        let url = format!("http://{addr}/player");
        let err = client().fetch(&url, TIMEOUT, 2).await.unwrap_err();

        match &err {
            RequestError::Http { status, body, .. } => {
                assert_eq!(*status, 503);
                assert!(body.is_none());
            }
            other => panic!("expected http error, got {other:?}"),
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }
}
