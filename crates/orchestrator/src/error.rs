//! Error types for session orchestration

use transport::SendError;

/// Errors surfaced by `send` and `poll`.
///
/// Cloneable: a single renewal outcome is delivered to every queued request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The server rejected the access token and it could not be renewed for
    /// this request (already replayed once, or a token endpoint).
    #[error("credential expired: {0}")]
    ExpiredCredential(String),

    /// Expiry with no stored session to renew. The session was cleared.
    #[error("no session: {0}")]
    NoSession(String),

    /// The renewal call failed. The session was cleared.
    #[error("credential renewal failed: {0}")]
    RenewalFailed(String),

    /// A non-success response other than expiry, body preserved.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("polling timed out after {attempts} attempts")]
    PollTimeout { attempts: u32 },

    #[error("status fetch failed: {0}")]
    PollFetchFailed(Box<Error>),
}

impl Error {
    /// The server's `detail` message, when the failure carried one.
    ///
    /// API errors are rendered from this; callers fall back to their own
    /// message when it is `None`.
    pub fn detail(&self) -> Option<String> {
        match self {
            Error::Status { body, .. } | Error::ExpiredCredential(body) => {
                let value: serde_json::Value = serde_json::from_str(body).ok()?;
                value.get("detail")?.as_str().map(str::to_owned)
            }
            Error::PollFetchFailed(inner) => inner.detail(),
            _ => None,
        }
    }

    /// Whether the session was lost as part of this failure.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Error::NoSession(_) | Error::RenewalFailed(_))
    }
}

impl From<SendError> for Error {
    fn from(err: SendError) -> Self {
        match err {
            SendError::ExpiredCredential(body) => Error::ExpiredCredential(body),
            SendError::Status { status, body } => Error::Status { status, body },
            SendError::Http(msg) => Error::Transport(msg),
            SendError::Decode(msg) => Error::Transport(format!("decoding response: {msg}")),
        }
    }
}

/// Result alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
