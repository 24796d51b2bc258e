//! Network transport used for every backend call: flag reads/updates,
//! filename lookups and batch uploads all go through [`Transport::send`].

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RemoteError;

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Patch,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn patch(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Patch,
            url: url.into(),
            body: Some(body),
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx reply into [`RemoteError::Status`].
    pub fn success(self) -> Result<Self, RemoteError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_status_error())
        }
    }

    pub fn into_status_error(self) -> RemoteError {
        RemoteError::Status {
            status: self.status,
            body: self.body,
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_str(&self.body).map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request.  Only transport-level failures are errors here;
    /// any HTTP status comes back as a [`Reply`].
    async fn send(&self, req: Request) -> Result<Reply, RemoteError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// reqwest-backed transport carrying the backend's two auth headers and a
/// bounded per-request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(api_key: &str, bearer_token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key).context("api key is not a valid header value")?;
        key.set_sensitive(true);
        headers.insert("apikey", key);

        let mut auth = HeaderValue::from_str(&format!("Bearer {bearer_token}"))
            .context("bearer token is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: Request) -> Result<Reply, RemoteError> {
        let mut builder = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Patch => self.client.patch(&req.url),
            Method::Post => self.client.post(&req.url),
        };
        if let Some(body) = &req.body {
            tracing::debug!(method = ?req.method, url = %req.url, %body, "sending payload");
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Reply { status, body })
    }
}

// ---------------------------------------------------------------------------
// Scripted backend for tests
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
