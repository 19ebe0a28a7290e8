//! Service-specific error types

use thiserror::Error;

/// Shortest job description the analysis endpoint accepts.
pub const MIN_JOB_DESCRIPTION_CHARS: usize = 100;

/// Largest resume file the upload endpoint accepts (5 MB).
pub const MAX_RESUME_BYTES: u64 = 5 * 1024 * 1024;

/// User-facing command failures.
///
/// API failures are rendered once, at the boundary, into the server's
/// `detail` message or a per-command fallback.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Api(String),

    #[error("usage: {0}")]
    Usage(String),

    #[error(
        "job description must be at least {min} characters, got {len}",
        min = MIN_JOB_DESCRIPTION_CHARS
    )]
    JobDescriptionTooShort { len: usize },

    #[error(
        "resume file too large: {size} bytes, maximum is {max}",
        max = MAX_RESUME_BYTES
    )]
    ResumeTooLarge { size: u64 },

    #[error("unsupported resume file {0}, only .pdf and .docx are accepted")]
    UnsupportedResumeType(String),

    #[error("session expired, run `resume-cli login <email>` again")]
    SessionLost,

    #[error("not logged in, run `resume-cli login <email>` first")]
    NotLoggedIn,
}

impl Error {
    /// Render an orchestrator failure for the terminal:
    /// the server's `detail` when present, `fallback` otherwise.
    pub fn api(err: &orchestrator::Error, fallback: &str) -> Self {
        match err {
            orchestrator::Error::PollTimeout { .. } => Error::Api("Analysis timed out.".into()),
            e if e.is_session_lost() => Error::SessionLost,
            e => Error::Api(e.detail().unwrap_or_else(|| fallback.to_owned())),
        }
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
