//! Request/response types and the network boundary.
//!
//! `Transport` is the only place that talks to the network. It reports
//! failures as a closed `TransportError` so the dispatcher can classify
//! exhaustively.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::ApiError;

/// Paths that make up the auth flow itself; a 401 on these never refreshes.
const AUTH_FLOW_PATHS: &[&str] = &["/auth/token", "/auth/refresh", "/auth/logout"];

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/auth/me`.
    pub path: String,
    pub body: RequestBody,
    bearer: Option<String>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            bearer: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = RequestBody::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Set the bearer credential. Replaces any earlier one.
    pub fn attach_bearer(&mut self, access: impl Into<String>) {
        self.bearer = Some(access.into());
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    /// One-way: once a request has been retried for 401 it stays retried.
    pub fn mark_retried(&mut self) {
        self.retried = true;
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub fn is_auth_flow(&self) -> bool {
        AUTH_FLOW_PATHS.iter().any(|p| self.path.starts_with(p))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "{} ({})",
                e,
                ApiError::truncate_body(&self.body)
            ))
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request aborted: {0}")]
    Aborted(String),
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        ApiError::Network {
            detail: e.to_string(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn map_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Aborted(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));
        if let Some(token) = request.bearer() {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(ref value) => builder.json(value),
            RequestBody::Form(ref fields) => builder.form(fields),
        };

        let response = builder.send().await.map_err(Self::map_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(Self::map_error)?;
        Ok(ApiResponse { status, body })
    }
}
