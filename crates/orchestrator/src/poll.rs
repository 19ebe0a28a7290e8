//! Bounded fixed-interval polling
//!
//! `poll` samples a resource's status on a spawned task until the status is
//! terminal, the attempt budget runs out, or a fetch fails. The first fetch
//! happens one interval after the call, never immediately.
//!
//! The returned `PollHandle` is the only way to stop the job. Cancelling
//! aborts the task, so no fetch is issued afterwards and `wait()` never
//! resolves.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info_span, warn};

use crate::error::{Error, Result};

/// Defaults used by the analysis watcher.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Shortest tick; a zero interval is raised to this.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Start polling `resource_id`.
///
/// `fetch_status` is called with the resource id once per tick. The job
/// resolves with the first status for which `is_terminal` holds, fails with
/// `PollFetchFailed` on the first fetch error, and fails with `PollTimeout`
/// once `max_attempts` fetches returned non-terminal statuses. An
/// `interval` below one millisecond is raised to it.
pub fn poll<S, F, Fut, P>(
    resource_id: impl Into<String>,
    fetch_status: F,
    is_terminal: P,
    interval: Duration,
    max_attempts: u32,
) -> PollHandle<S>
where
    S: Send + 'static,
    F: Fn(String) -> Fut + Send + 'static,
    Fut: Future<Output = Result<S>> + Send,
    P: Fn(&S) -> bool + Send + 'static,
{
    let resource_id = resource_id.into();
    let cancelled = Arc::new(AtomicBool::new(false));
    let attempts = Arc::new(AtomicU32::new(0));
    let (tx, rx) = oneshot::channel();

    let span = info_span!("poll", resource_id = %resource_id, max_attempts);
    let job = PollJob {
        resource_id,
        interval,
        max_attempts,
        attempts: attempts.clone(),
    };
    let task = tokio::spawn(
        async move {
            let outcome = job.run(fetch_status, is_terminal).await;
            let label = match &outcome {
                Ok(_) => "terminal",
                Err(Error::PollTimeout { .. }) => "timeout",
                Err(_) => "fetch_failed",
            };
            metrics::counter!("poll_outcomes_total", "outcome" => label).increment(1);
            // Receiver gone means nobody is waiting; nothing to report
            let _ = tx.send(outcome);
        }
        .instrument(span),
    );

    PollHandle {
        abort: task.abort_handle(),
        cancelled,
        attempts,
        outcome: rx,
    }
}

struct PollJob {
    resource_id: String,
    interval: Duration,
    max_attempts: u32,
    attempts: Arc<AtomicU32>,
}

impl PollJob {
    async fn run<S, F, Fut, P>(&self, fetch_status: F, is_terminal: P) -> Result<S>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<S>>,
        P: Fn(&S) -> bool,
    {
        let mut ticker = tokio::time::interval(self.interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            metrics::counter!("poll_attempts_total").increment(1);

            let status = match fetch_status(self.resource_id.clone()).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(attempt, error = %e, "status fetch failed, stopping");
                    return Err(Error::PollFetchFailed(Box::new(e)));
                }
            };

            if is_terminal(&status) {
                debug!(attempt, "terminal status reached");
                return Ok(status);
            }
            if attempt >= self.max_attempts {
                warn!(attempt, "attempt budget exhausted");
                return Err(Error::PollTimeout { attempts: attempt });
            }
            debug!(attempt, "status not terminal yet");
        }
    }
}

/// Handle to a running poll job.
#[derive(Debug)]
pub struct PollHandle<S> {
    abort: AbortHandle,
    cancelled: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    outcome: oneshot::Receiver<Result<S>>,
}

impl<S> PollHandle<S> {
    /// Stop polling. No further fetch is issued and `wait()` never resolves.
    pub fn cancel(&self) {
        self.canceller().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fetches issued so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// A detached cancel switch, usable after `wait()` took the handle.
    pub fn canceller(&self) -> PollCanceller {
        PollCanceller {
            abort: self.abort.clone(),
            cancelled: self.cancelled.clone(),
        }
    }

    /// Wait for the job's outcome.
    pub async fn wait(self) -> Result<S> {
        let outcome = self.outcome.await;
        if self.cancelled.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        outcome.unwrap_or_else(|_| {
            Err(Error::PollFetchFailed(Box::new(Error::Transport(
                "polling task stopped unexpectedly".into(),
            ))))
        })
    }
}

/// Cancels a poll job from outside its handle.
#[derive(Debug, Clone)]
pub struct PollCanceller {
    abort: AbortHandle,
    cancelled: Arc<AtomicBool>,
}

impl PollCanceller {
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("poll cancelled");
        }
        self.abort.abort();
    }
}
