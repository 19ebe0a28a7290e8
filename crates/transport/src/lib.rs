//! Request transport abstraction for the API client
//!
//! Defines the `Transport` trait that decouples session orchestration from
//! HTTP execution. The orchestrator only ever sees "send this request" and
//! "renew with this refresh token"; `HttpTransport` is the reqwest-backed
//! implementation and tests substitute in-memory fakes.
//!
//! Failures are classified at this boundary: a 401 becomes
//! `SendError::ExpiredCredential` (recoverable once via renewal), every
//! other failure is surfaced unchanged.

pub mod http;
pub mod request;

pub use http::HttpTransport;
pub use request::{ApiRequest, ApiResponse, Body, FilePart};

use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;

/// Classification of a non-success response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The access token was rejected (401); renewal may recover it
    ExpiredCredential,
    /// Any other non-success status, propagated to the caller untouched
    Failed,
}

/// Classify a non-success HTTP status.
///
/// Only 401 means the bearer token expired. 403 is an authorization decision
/// on a valid token and renewing would not change it.
pub fn classify_status(status: u16) -> FailureClass {
    match status {
        401 => FailureClass::ExpiredCredential,
        _ => FailureClass::Failed,
    }
}

/// Errors from the transport layer.
///
/// Payloads are plain strings so the error is `Clone` and can be fanned out
/// to every request waiting on the same renewal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("credential expired: {0}")]
    ExpiredCredential(String),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, SendError>;

/// Body returned by the token refresh endpoint.
///
/// `refresh` is only present when the server rotated the refresh token.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewedTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Abstraction over request execution and credential renewal.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Execute a request exactly as given. Credentials are already attached.
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>>;

    /// Exchange a refresh token for a new access token.
    ///
    /// Must not go through the request pipeline: a 401 here is a renewal
    /// failure, not something to renew again.
    fn renew<'a>(
        &'a self,
        refresh: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RenewedTokens>> + Send + 'a>>;
}
