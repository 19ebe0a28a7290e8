//! Session orchestration for the API client
//!
//! Sends API calls under a bearer-token session, renews an expired access
//! token exactly once no matter how many requests hit the expiry together,
//! and replays those requests with the renewed token. Also provides the
//! bounded polling primitive used to wait for server-side work.
//!
//! Request lifecycle:
//! 1. `Orchestrator::send` attaches the stored access token and dispatches
//! 2. A 401 routes the request to the `RefreshCoordinator`
//! 3. The first such request starts the renewal; later ones queue behind it
//! 4. On success every queued request is replayed once with the new token
//! 5. On failure the session is cleared and the `SessionLost` hook runs

pub mod client;
pub mod coordinator;
pub mod error;
pub mod lost;
pub mod pipeline;
pub mod poll;

#[cfg(test)]
mod testing;

pub use client::Orchestrator;
pub use coordinator::RefreshCoordinator;
pub use error::{Error, Result};
pub use lost::{IgnoreSessionLost, SessionLost};
pub use pipeline::RequestPipeline;
pub use poll::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL, PollCanceller, PollHandle, poll};
