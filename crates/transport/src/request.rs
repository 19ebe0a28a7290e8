//! Request and response values passed through the transport boundary

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::{Result, SendError};

/// Path prefix of the token endpoints (login and refresh).
const TOKEN_ENDPOINT_PREFIX: &str = "/auth/token/";

/// Request payload.
#[derive(Debug, Clone)]
pub enum Body {
    Json(serde_json::Value),
    /// `multipart/form-data`; the transport picks the boundary
    Multipart(Vec<FilePart>),
}

/// One file field of a multipart body.
///
/// Content is held as `Bytes` so replaying the request does not copy it.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub content: Bytes,
}

/// An outbound API call, relative to the transport's base URL.
///
/// Cloneable so a request can be replayed after credential renewal.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    /// Token endpoints set this: a 401 from them is a real rejection and
    /// must never be routed into renewal.
    pub skip_refresh: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let skip_refresh = is_token_endpoint(&path);
        Self {
            method,
            path,
            headers: HeaderMap::new(),
            body: None,
            skip_refresh,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// A multipart `POST` carrying `parts`.
    pub fn upload(path: impl Into<String>, parts: Vec<FilePart>) -> Self {
        let mut request = Self::new(Method::POST, path);
        request.body = Some(Body::Multipart(parts));
        request
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    /// The JSON body, if the request carries one.
    pub fn json(&self) -> Option<&serde_json::Value> {
        match &self.body {
            Some(Body::Json(value)) => Some(value),
            _ => None,
        }
    }
}

fn is_token_endpoint(path: &str) -> bool {
    path.contains(TOKEN_ENDPOINT_PREFIX)
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Build a response from a JSON value (used by fakes and tests).
    pub fn from_json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| SendError::Decode(e.to_string()))
    }
}
