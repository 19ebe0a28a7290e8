//! Credential attacher

use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::warn;
use transport::ApiRequest;

use crate::constants::BEARER_SCHEME;
use crate::credentials::Credential;

/// Return a copy of `request` carrying `Authorization: Bearer <access>`.
///
/// Without a credential the copy is unmodified and goes out unauthenticated.
/// Any Authorization header already on the request is replaced.
pub fn decorate(request: &ApiRequest, credential: Option<&Credential>) -> ApiRequest {
    let mut decorated = request.clone();
    let Some(credential) = credential else {
        return decorated;
    };

    match HeaderValue::from_str(&format!("{BEARER_SCHEME} {}", credential.access.expose())) {
        Ok(mut value) => {
            value.set_sensitive(true);
            decorated.headers.insert(AUTHORIZATION, value);
        }
        Err(e) => {
            warn!(error = %e, path = %request.path, "access token is not a valid header value, sending unauthenticated");
        }
    }
    decorated
}
