//! HTTP transport for the REST API.
//!
//! The gateway speaks to the backend through the [`HttpTransport`] trait so
//! that the refresh and retry logic is independent of the HTTP client in use.
//! [`ReqwestTransport`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client as ReqwestClient, Method as ReqwestMethod};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// HTTP method of an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
}

/// Body of an API call.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// A JSON document.
    Json(serde_json::Value),
    /// A single-file multipart form.
    Multipart {
        /// Form field name.
        field: String,
        /// File name reported to the server.
        file_name: String,
        /// File contents.
        bytes: Bytes,
    },
}

/// An API call, before or after the gateway attached credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API base, without a leading slash.
    pub path: String,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
    /// Bearer token attached by the gateway.
    pub bearer: Option<String>,
    /// Whether the call needs an authenticated session.
    pub requires_session: bool,
}

impl ApiRequest {
    /// Creates an authorized request with no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            bearer: None,
            requires_session: true,
        }
    }

    /// Creates an authorized `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates an authorized `POST` request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Creates an authorized `DELETE` request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Marks the request as not needing a session.
    ///
    /// Public requests still carry the bearer token when one is present, but an
    /// authorization failure is reported as-is instead of triggering a refresh.
    pub fn public(mut self) -> Self {
        self.requires_session = false;
        self
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a JSON body.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Sets a single-file multipart body.
    pub fn with_file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        self.body = RequestBody::Multipart {
            field: field.into(),
            file_name: file_name.into(),
            bytes: bytes.into(),
        };
        self
    }
}

/// A raw API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `retry-after` header, in seconds.
    pub retry_after: Option<u64>,
    /// Response body.
    pub body: Bytes,
}

impl ApiResponse {
    /// Creates a response with a JSON body.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            retry_after: None,
            body: Bytes::from(body.to_string()),
        }
    }

    /// Creates a response with an empty body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: Bytes::new(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if the server rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Parses the body as JSON.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {e}"),
                Some(Box::new(e)),
            )
        })
    }
}

/// Executes API calls.
///
/// Implementations return `Err` only when no response was obtained; every HTTP
/// status, including errors, comes back as an [`ApiResponse`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the server's response.
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
///
/// The cookie store is enabled so the HTTP-only refresh cookie set at sign-in
/// is replayed on `POST /auth/refresh`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport for the configured server.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let timeout = config.timeout();
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url: config.api_base()?,
            timeout,
        })
    }

    /// Returns the base URL paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn build_form(field: &str, file_name: &str, bytes: &Bytes) -> Form {
        let part = Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
        Form::new().part(field.to_string(), part)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.base_url.join(&request.path)?;
        let method = match request.method {
            Method::Get => ReqwestMethod::GET,
            Method::Post => ReqwestMethod::POST,
            Method::Delete => ReqwestMethod::DELETE,
        };

        let mut builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, HeaderValue::from_static("application/json"));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart {
                field,
                file_name,
                bytes,
            } => builder.multipart(Self::build_form(field, file_name, bytes)),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("Request timed out: {e}"),
                    Some(self.timeout.as_secs_f64()),
                )
            } else if e.is_connect() {
                Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
            } else {
                Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());
        let body = response.bytes().await.map_err(|e| {
            Error::http_client(
                format!("Failed to read response body: {e}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(ApiResponse {
            status,
            retry_after,
            body,
        })
    }
}
