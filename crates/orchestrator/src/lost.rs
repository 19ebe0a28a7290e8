//! Session-lost port
//!
//! Losing the session (renewal failed, or expiry with nothing to renew) has a
//! caller-specific consequence: a browser navigates to its login page, a CLI
//! tells the user to log in again. The orchestrator only invokes this hook.

/// Invoked after the stored session has been cleared.
pub trait SessionLost: Send + Sync {
    fn on_session_lost(&self);
}

impl<F> SessionLost for F
where
    F: Fn() + Send + Sync,
{
    fn on_session_lost(&self) {
        self()
    }
}

/// Hook that does nothing beyond the session clear itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreSessionLost;

impl SessionLost for IgnoreSessionLost {
    fn on_session_lost(&self) {}
}
