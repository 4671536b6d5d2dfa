//! HTTP transport abstraction.
//!
//! The service speaks to its backend through this trait so tests (and hosts
//! with exotic networking) can script responses. The default implementation
//! rides on `reqwest`.

use crate::core::{Result, ServiceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One file attached to a multipart action request.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePayload {
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum HttpBody {
    Json(serde_json::Value),
    /// Multipart form data: the JSON envelope under a `data` field plus
    /// `attributeName → file` pairs.
    Multipart {
        data: serde_json::Value,
        files: Vec<(String, FilePayload)>,
    },
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<HttpBody>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: &str, body: HttpBody) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.to_string(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: HashMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            body,
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Sends a request whose response is a server-push event stream.
    async fn send_streaming(&self, request: HttpRequest) -> Result<ByteStream>;
}

/// Sends a request, sleeping and retrying on every 429 response.
///
/// The retry delay comes from `Retry-After` (seconds, or an HTTP-date
/// fallback computed as `max(0, target - now)`), defaulting to
/// `default_delay` when unparsable. The loop has NO attempt cap: a server
/// that keeps answering 429 stalls the request indefinitely. Deployments
/// that need a bound must wrap the transport.
pub(crate) async fn fetch_with_retry(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    default_delay: Duration,
) -> Result<HttpResponse> {
    loop {
        let response = transport.send(request.clone()).await?;
        if response.status != 429 {
            return Ok(response);
        }

        let delay = response
            .header("retry-after")
            .and_then(parse_retry_after)
            .unwrap_or(default_delay);

        warn!(url = %request.url, delay_ms = delay.as_millis() as u64, "rate limited, retrying");
        tokio::time::sleep(delay).await;
    }
}

/// Parses a `Retry-After` header value: seconds, or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let when = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let delta = (when - Utc::now()).num_milliseconds().max(0) as u64;
    Some(Duration::from_millis(delta))
}

/// `reqwest`-backed transport; the default.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Self {
            client: builder.build().unwrap_or_default(),
        }
    }

    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        match request.body {
            Some(HttpBody::Json(json)) => {
                builder = builder.json(&json);
            }
            Some(HttpBody::Multipart { data, files }) => {
                let mut form = reqwest::multipart::Form::new().text("data", data.to_string());
                for (name, file) in files {
                    form = form.part(
                        name,
                        reqwest::multipart::Part::bytes(file.content).file_name(file.file_name),
                    );
                }
                builder = builder.multipart(form);
            }
            None => {}
        }

        Ok(builder)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let response = self.build_request(request)?.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(%url, status, bytes = body.len(), "request completed");

        Ok(HttpResponse { status, headers, body })
    }

    async fn send_streaming(&self, request: HttpRequest) -> Result<ByteStream> {
        let request = request.header("Accept", "text/event-stream");
        let response = self.build_request(request)?.send().await?;

        if !response.status().is_success() {
            return Err(ServiceError::Transport(response.status().to_string()));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(ServiceError::from)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
    }

    #[test]
    fn retry_after_past_date_clamps_to_zero() {
        let delay = parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(delay, Duration::from_millis(0));
    }

    #[test]
    fn retry_after_garbage_is_none() {
        assert_eq!(parse_retry_after("soon"), None);
    }
}
