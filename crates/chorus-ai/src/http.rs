//! HTTP seam between adapters and the network
//!
//! Adapters only ever issue JSON POSTs and read the body line by line, so the
//! seam is a single method. Tests substitute a scripted client.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::error::Result;

/// Streaming response body
pub type BodyReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// A JSON POST
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: vec![],
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

pub struct HttpResponse {
    pub status: u16,
    pub body: BodyReader,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into a string (error bodies, non-streaming responses)
    pub async fn text(mut self) -> Result<String> {
        let mut bytes = Vec::new();
        self.body.read_to_end(&mut bytes).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request. Non-2xx statuses are returned, not raised; only
    /// transport failures are errors.
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        tracing::debug!("POST {}", request.url);
        let response = builder.send().await?;
        let status = response.status().as_u16();

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(HttpResponse {
            status,
            body: Box::pin(StreamReader::new(stream)),
        })
    }
}
