//! reqwest-backed transport
//!
//! Joins request paths onto the configured API base URL, applies a per-request
//! timeout, and classifies failures. Renewal posts the refresh token to the
//! token refresh endpoint on the raw client, outside any credential handling.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::{
    ApiRequest, ApiResponse, Body, FailureClass, FilePart, RenewedTokens, Result, SendError,
    Transport, classify_status,
};

/// Token refresh endpoint, relative to the base URL.
pub const REFRESH_PATH: &str = "/auth/token/refresh/";

/// HTTP transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join a request path onto the base URL with exactly one separating slash.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.url(&request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers)
            .timeout(self.timeout);
        match request.body {
            Some(Body::Json(body)) => builder = builder.json(&body),
            Some(Body::Multipart(parts)) => builder = builder.multipart(multipart_form(parts)?),
            None => {}
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SendError::Http(format!("{} {url}: {e}", request.method)))?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            debug!(status = status.as_u16(), url = %url, "request failed");
            return Err(match classify_status(status.as_u16()) {
                FailureClass::ExpiredCredential => SendError::ExpiredCredential(body),
                FailureClass::Failed => SendError::Status {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SendError::Http(format!("reading response body from {url}: {e}")))?;

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    async fn refresh(&self, refresh: &str) -> Result<RenewedTokens> {
        let url = self.url(REFRESH_PATH);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "refresh": refresh }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SendError::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(SendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<RenewedTokens>()
            .await
            .map_err(|e| SendError::Decode(format!("invalid refresh response: {e}")))
    }
}

/// Build a multipart form with one file part per entry.
fn multipart_form(parts: Vec<FilePart>) -> Result<Form> {
    let mut form = Form::new();
    for part in parts {
        let file = Part::bytes(part.content.to_vec())
            .file_name(part.file_name)
            .mime_str(&part.mime)
            .map_err(|e| SendError::Http(format!("invalid mime type {}: {e}", part.mime)))?;
        form = form.part(part.field, file);
    }
    Ok(form)
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(self.execute(request))
    }

    fn renew<'a>(
        &'a self,
        refresh: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RenewedTokens>> + Send + 'a>> {
        Box::pin(self.refresh(refresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept a single connection, capture the raw request, reply with a
    /// canned status and JSON body.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + content_length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{addr}/api/v1"), handle)
    }

    fn transport(base_url: &str) -> HttpTransport {
        HttpTransport::new(reqwest::Client::new(), base_url, Duration::from_secs(5))
    }

    #[test]
    fn url_joins_with_single_slash() {
        let t = transport("http://localhost:8000/api/v1/");
        assert_eq!(t.base_url(), "http://localhost:8000/api/v1/");
        assert_eq!(t.url("/resumes/"), "http://localhost:8000/api/v1/resumes/");
        let t = transport("http://localhost:8000/api/v1");
        assert_eq!(t.url("resumes/"), "http://localhost:8000/api/v1/resumes/");
    }

    #[tokio::test]
    async fn send_forwards_headers_and_returns_body() {
        let (base, server) = serve_once("200 OK", r#"{"id":3}"#).await;
        let t = transport(&base);

        let mut request = ApiRequest::get("/resumes/3/");
        request.headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_static("Bearer at_1"),
        );
        let response = t.send(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.json::<serde_json::Value>().unwrap()["id"], 3);

        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.starts_with("get /api/v1/resumes/3/ http/1.1"), "got: {raw}");
        assert!(raw.contains("authorization: bearer at_1"));
    }

    #[tokio::test]
    async fn upload_sends_multipart_file() {
        let (base, server) = serve_once("201 Created", r#"{"id":5}"#).await;
        let request = ApiRequest::upload(
            "/resumes/",
            vec![FilePart {
                field: "file".into(),
                file_name: "cv.pdf".into(),
                mime: "application/pdf".into(),
                content: bytes::Bytes::from_static(b"%PDF-1.7 resume"),
            }],
        );
        let response = transport(&base).send(request).await.unwrap();
        assert_eq!(response.status, 201);

        let raw = server.await.unwrap();
        let lower = raw.to_lowercase();
        assert!(lower.starts_with("post /api/v1/resumes/ http/1.1"), "got: {raw}");
        assert!(lower.contains("content-type: multipart/form-data; boundary="));
        assert!(raw.contains(r#"name="file"; filename="cv.pdf""#), "got: {raw}");
        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("%PDF-1.7 resume"));
    }

    #[tokio::test]
    async fn send_classifies_401_as_expired() {
        let (base, _server) = serve_once(
            "401 Unauthorized",
            r#"{"detail":"Given token not valid for any token type"}"#,
        )
        .await;
        let err = transport(&base)
            .send(ApiRequest::get("/auth/me/"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::ExpiredCredential(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn send_propagates_other_statuses() {
        let (base, _server) = serve_once("404 Not Found", r#"{"detail":"Not found."}"#).await;
        let err = transport(&base)
            .send(ApiRequest::get("/analysis/missing/"))
            .await
            .unwrap_err();
        match err {
            SendError::Status { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("Not found."));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn renew_posts_refresh_token() {
        let (base, server) = serve_once("200 OK", r#"{"access":"at_2","refresh":"rt_2"}"#).await;
        let tokens = transport(&base).renew("rt_1").await.unwrap();
        assert_eq!(tokens.access, "at_2");
        assert_eq!(tokens.refresh.as_deref(), Some("rt_2"));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/v1/auth/token/refresh/ HTTP/1.1"), "got: {raw}");
        assert!(raw.contains(r#"{"refresh":"rt_1"}"#));
    }

    #[tokio::test]
    async fn renew_rejection_is_an_error() {
        let (base, _server) = serve_once(
            "401 Unauthorized",
            r#"{"detail":"Token is invalid or expired"}"#,
        )
        .await;
        let err = transport(&base).renew("rt_revoked").await.unwrap_err();
        assert!(matches!(err, SendError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn connection_failure_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = transport(&format!("http://{addr}"))
            .send(ApiRequest::get("/resumes/"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Http(_)), "got: {err:?}");
    }
}
