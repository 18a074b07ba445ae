//! HTTP client for endpoints that answer with `text/event-stream`.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::Config;
use crate::sse::{FrameParser, SseFrame};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-2xx response. `message` comes from the JSON error body when the
    /// server sent one, otherwise it is `HTTP <status>`.
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("invalid session header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

/// POSTs JSON and drives an SSE frame parser over the streamed response.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SseClient {
    http: reqwest::Client,
    base_url: String,
    session_headers: HeaderMap,
}

impl SseClient {
    /// Build a client for `config.base_url`, sending the API token (if any)
    /// as a bearer `Authorization` header on every request.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let mut session_headers = HeaderMap::new();
        if let Some(token) = config.api_token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            session_headers.insert(AUTHORIZATION, value);
        }
        Ok(Self::with_client(reqwest::Client::new(), &config.base_url).with_headers(session_headers))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_headers: HeaderMap::new(),
        }
    }

    /// Replace the headers sent with every request.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.session_headers = headers;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST `body` to `path` and call `on_frame` for every SSE frame, in
    /// arrival order, until the server closes the stream.
    ///
    /// Cancellation is cooperative: `cancel` is checked before the request
    /// is sent and at every read boundary. A read already waiting on the
    /// network is not interrupted, but once the token is observed no further
    /// chunk is processed; the response is dropped and the call returns
    /// `Ok(())`. Cancellation is never reported as an error, so callers that
    /// need to know inspect their own token.
    pub async fn stream<B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
        mut on_frame: impl FnMut(SseFrame),
    ) -> Result<(), ClientError>
    where
        B: Serialize + ?Sized,
    {
        if cancel.is_cancelled() {
            log::debug!("{path}: cancelled before request");
            return Ok(());
        }
        let response = self
            .http
            .post(self.url(path))
            .headers(self.session_headers.clone())
            .header(ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let mut parser = FrameParser::new();
        let mut body = response.bytes_stream();
        loop {
            if cancel.is_cancelled() {
                log::debug!("{path}: stream abandoned on cancel");
                return Ok(());
            }
            let Some(chunk) = body.next().await else { break };
            if cancel.is_cancelled() {
                log::debug!("{path}: stream abandoned on cancel");
                return Ok(());
            }
            for frame in parser.feed(&chunk?) {
                on_frame(frame);
            }
        }

        if parser.pending_len() > 0 {
            log::debug!(
                "{path}: stream closed with {} bytes of unterminated line",
                parser.pending_len()
            );
        }
        Ok(())
    }

    /// POST `body` to `path` and decode a plain JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.url(path))
            .headers(self.session_headers.clone())
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Turn a non-2xx response into [`ClientError::Status`].
async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Human-readable message from a JSON error body, if it has one.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message", "detail"].iter().find_map(|key| match value.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Object(inner) => inner
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        _ => None,
    })
}
