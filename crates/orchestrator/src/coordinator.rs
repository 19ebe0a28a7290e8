//! Deduplicated credential renewal
//!
//! When many requests hit an expired access token at once, exactly one
//! renewal call goes out. Every request that observes expiry while the
//! renewal is in flight is queued as a waiter and receives the same outcome.
//!
//! State transitions:
//! - Idle → Refreshing (first expiry with a stored refresh token)
//! - Refreshing → Refreshing (further expiries join the waiter queue)
//! - Refreshing → Idle (renewal settled; the queue is drained in arrival order)
//!
//! The state lives behind a synchronous mutex. Observing `Idle` and switching
//! to `Refreshing` happen in one critical section that contains no `.await`,
//! so two requests can never both decide to start a renewal. The renewal
//! itself runs on a spawned task: dropping the request that triggered it does
//! not abandon the requests queued behind it. A renewal task that dies before
//! settling (panic or abort) fails the queue and clears the session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use session::{Credential, SessionStore};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use transport::Transport;

use crate::error::{Error, Result};
use crate::lost::SessionLost;

/// One request suspended until the in-flight renewal settles.
#[derive(Debug)]
struct PendingWaiter {
    request_id: String,
    tx: oneshot::Sender<Result<Credential>>,
}

/// Renewal state. The waiter list only exists while refreshing.
#[derive(Debug, Default)]
enum RefreshState {
    #[default]
    Idle,
    Refreshing {
        waiters: Vec<PendingWaiter>,
    },
}

/// What a request does after the critical section.
enum Decision {
    /// Started the renewal; wait on the queue like everyone else
    Lead(Secret<String>, oneshot::Receiver<Result<Credential>>),
    /// Renewal already in flight
    Follow(oneshot::Receiver<Result<Credential>>),
    /// No refresh token stored; session already cleared
    NoRefreshToken,
}

struct Shared {
    store: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    session_lost: Arc<dyn SessionLost>,
    state: Mutex<RefreshState>,
}

/// Coordinates renewal across all requests sharing a session.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        session_lost: Arc<dyn SessionLost>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                transport,
                session_lost,
                state: Mutex::new(RefreshState::Idle),
            }),
        }
    }

    /// Wait for a renewed credential on behalf of `request_id`.
    ///
    /// Starts a renewal if none is in flight, otherwise joins the queue.
    /// Fails with `NoSession` when there is no refresh token and with
    /// `RenewalFailed` when the renewal call fails; in both cases the session
    /// has been cleared and the session-lost hook invoked once.
    pub async fn handle_expiry(&self, request_id: &str) -> Result<Credential> {
        let decision = {
            let mut state = self.lock_state();
            if let RefreshState::Refreshing { waiters } = &mut *state {
                let (tx, rx) = oneshot::channel();
                waiters.push(PendingWaiter {
                    request_id: request_id.to_owned(),
                    tx,
                });
                debug!(request_id, queued = waiters.len(), "renewal in flight, queued");
                Decision::Follow(rx)
            } else if let Some(refresh) = self.shared.store.refresh_token() {
                let (tx, rx) = oneshot::channel();
                *state = RefreshState::Refreshing {
                    waiters: vec![PendingWaiter {
                        request_id: request_id.to_owned(),
                        tx,
                    }],
                };
                Decision::Lead(refresh, rx)
            } else {
                self.shared.store.clear();
                Decision::NoRefreshToken
            }
        };

        let rx = match decision {
            Decision::Lead(refresh, rx) => {
                info!(request_id, "access token expired, starting renewal");
                let coordinator = self.clone();
                tokio::spawn(async move { coordinator.renew(refresh).await });
                rx
            }
            Decision::Follow(rx) => rx,
            Decision::NoRefreshToken => {
                warn!(request_id, "access token expired and no refresh token stored");
                metrics::counter!("session_renewals_total", "outcome" => "no_refresh_token")
                    .increment(1);
                self.shared.session_lost.on_session_lost();
                return Err(Error::NoSession("no refresh token stored".into()));
            }
        };

        rx.await
            .unwrap_or_else(|_| Err(Error::RenewalFailed("renewal ended without a result".into())))
    }

    /// Whether a renewal is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Number of requests waiting on the in-flight renewal.
    pub fn pending_waiters(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Run the renewal call and settle every waiter with its outcome.
    async fn renew(&self, refresh: Secret<String>) {
        let guard = RenewalGuard {
            coordinator: self.clone(),
            settled: false,
        };
        let outcome = self.shared.transport.renew(refresh.expose()).await;

        let result = match outcome {
            Ok(tokens) => {
                let credential = self.shared.store.renew(tokens.access, tokens.refresh);
                metrics::counter!("session_renewals_total", "outcome" => "success").increment(1);
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "credential renewal failed, clearing session");
                self.lose_session("failure");
                Err(Error::RenewalFailed(e.to_string()))
            }
        };

        guard.settle(result);
    }

    /// Clear the store and notify the session-lost hook.
    fn lose_session(&self, outcome: &'static str) {
        self.shared.store.clear();
        metrics::counter!("session_renewals_total", "outcome" => outcome).increment(1);
        self.shared.session_lost.on_session_lost();
    }

    /// Hand `result` to every queued waiter.
    fn flush(&self, result: Result<Credential>) {
        let waiters = self.finish();
        info!(
            waiters = waiters.len(),
            renewed = result.is_ok(),
            "renewal settled, flushing queue"
        );
        for waiter in waiters {
            if waiter.tx.send(result.clone()).is_err() {
                debug!(request_id = %waiter.request_id, "waiter dropped before renewal settled");
            }
        }
    }

    /// Return to `Idle`, handing back the queue in arrival order.
    fn finish(&self) -> Vec<PendingWaiter> {
        let mut state = self.lock_state();
        match std::mem::take(&mut *state) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => {
                warn!("renewal finished while idle");
                Vec::new()
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the queue if the renewal task ends without a result.
///
/// Covers a panicking transport and an aborted task: the state must never
/// stay `Refreshing` with nobody left to drain it.
struct RenewalGuard {
    coordinator: RefreshCoordinator,
    settled: bool,
}

impl RenewalGuard {
    fn settle(mut self, result: Result<Credential>) {
        self.settled = true;
        self.coordinator.flush(result);
    }
}

impl Drop for RenewalGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("renewal task ended without a result, clearing session");
        self.coordinator.lose_session("aborted");
        self.coordinator.flush(Err(Error::RenewalFailed(
            "renewal ended without a result".into(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, LostCounter, session_with};
    use transport::SendError;

    fn coordinator(
        store: &Arc<SessionStore>,
        transport: &Arc<FakeTransport>,
        lost: &Arc<LostCounter>,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(store.clone(), transport.clone(), lost.clone())
    }

    #[tokio::test]
    async fn renewal_stores_new_access_token() {
        let store = session_with(Some("at_old"), Some("rt_1"));
        let transport = FakeTransport::new("at_new", "at_new");
        let lost = Arc::new(LostCounter::default());
        let coordinator = coordinator(&store, &transport, &lost);

        let credential = coordinator.handle_expiry("req_1").await.unwrap();
        assert_eq!(credential.access.expose(), "at_new");
        assert_eq!(credential.refresh.unwrap().expose(), "rt_1");
        assert_eq!(store.read().unwrap().access.expose(), "at_new");
        assert_eq!(transport.renew_count(), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(lost.count(), 0);
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_stored() {
        let store = session_with(Some("at_old"), Some("rt_1"));
        let transport = FakeTransport::new("at_new", "at_new");
        transport.rotate_refresh("rt_2");
        let lost = Arc::new(LostCounter::default());

        coordinator(&store, &transport, &lost)
            .handle_expiry("req_1")
            .await
            .unwrap();
        assert_eq!(store.refresh_token().unwrap().expose(), "rt_2");
    }

    #[tokio::test]
    async fn concurrent_expiries_share_one_renewal() {
        let store = session_with(Some("at_old"), Some("rt_1"));
        let transport = FakeTransport::new("at_new", "at_new");
        let gate = transport.hold_renewal();
        let lost = Arc::new(LostCounter::default());
        let coordinator = coordinator(&store, &transport, &lost);

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.handle_expiry(&format!("req_{i}")).await })
            })
            .collect();

        while coordinator.pending_waiters() < 5 {
            tokio::task::yield_now().await;
        }
        assert!(coordinator.is_refreshing());
        gate.notify_one();

        for handle in handles {
            let credential = handle.await.unwrap().unwrap();
            assert_eq!(credential.access.expose(), "at_new");
        }
        assert_eq!(transport.renew_count(), 1);
        assert_eq!(coordinator.pending_waiters(), 0);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn waiters_are_settled_in_arrival_order() {
        let store = session_with(Some("at_old"), Some("rt_1"));
        let transport = FakeTransport::new("at_new", "at_new");
        let gate = transport.hold_renewal();
        let lost = Arc::new(LostCounter::default());
        let coordinator = coordinator(&store, &transport, &lost);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let waiter = coordinator.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                waiter.handle_expiry(&format!("req_{i}")).await.unwrap();
                order.lock().unwrap().push(i);
            }));
            while coordinator.pending_waiters() < i + 1 {
                tokio::task::yield_now().await;
            }
        }
        gate.notify_one();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn renewal_failure_rejects_every_waiter_and_clears_session() {
        let store = session_with(Some("at_old"), Some("rt_revoked"));
        let transport = FakeTransport::new("at_new", "at_new");
        transport.fail_renewal(SendError::Status {
            status: 401,
            body: r#"{"detail":"Token is blacklisted"}"#.into(),
        });
        let gate = transport.hold_renewal();
        let lost = Arc::new(LostCounter::default());
        let coordinator = coordinator(&store, &transport, &lost);

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.handle_expiry(&format!("req_{i}")).await })
            })
            .collect();
        while coordinator.pending_waiters() < 3 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::RenewalFailed(_)), "got: {err:?}");
        }
        assert!(store.read().is_none());
        assert!(store.refresh_token().is_none());
        assert_eq!(lost.count(), 1);
        assert_eq!(transport.renew_count(), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_renewal() {
        let store = session_with(Some("at_old"), None);
        let transport = FakeTransport::new("at_new", "at_new");
        let lost = Arc::new(LostCounter::default());
        let coordinator = coordinator(&store, &transport, &lost);

        let err = coordinator.handle_expiry("req_1").await.unwrap_err();
        assert!(matches!(err, Error::NoSession(_)), "got: {err:?}");
        assert_eq!(transport.renew_count(), 0);
        assert!(store.read().is_none());
        assert_eq!(lost.count(), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn dropped_trigger_does_not_strand_waiters() {
        let store = session_with(Some("at_old"), Some("rt_1"));
        let transport = FakeTransport::new("at_new", "at_new");
        let gate = transport.hold_renewal();
        let lost = Arc::new(LostCounter::default());
        let coordinator = coordinator(&store, &transport, &lost);

        let trigger = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.handle_expiry("req_trigger").await })
        };
        while coordinator.pending_waiters() < 1 {
            tokio::task::yield_now().await;
        }
        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.handle_expiry("req_follower").await })
        };
        while coordinator.pending_waiters() < 2 {
            tokio::task::yield_now().await;
        }

        trigger.abort();
        gate.notify_one();

        let credential = follower.await.unwrap().unwrap();
        assert_eq!(credential.access.expose(), "at_new");
        assert_eq!(transport.renew_count(), 1);
    }

    #[tokio::test]
    async fn sequential_expiries_renew_each_time() {
        let store = session_with(Some("at_old"), Some("rt_1"));
        let transport = FakeTransport::new("at_new", "at_new");
        let lost = Arc::new(LostCounter::default());
        let coordinator = coordinator(&store, &transport, &lost);

        coordinator.handle_expiry("req_1").await.unwrap();
        coordinator.handle_expiry("req_2").await.unwrap();
        assert_eq!(transport.renew_count(), 2);
    }

    #[tokio::test]
    async fn panicking_renewal_fails_waiters_and_clears_session() {
        let store = session_with(Some("at_old"), Some("rt_1"));
        let transport = FakeTransport::new("at_new", "at_new");
        transport.panic_on_renew();
        let lost = Arc::new(LostCounter::default());
        let coordinator = coordinator(&store, &transport, &lost);

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            coordinator.handle_expiry("req_1"),
        )
        .await
        .expect("waiter must be settled")
        .unwrap_err();
        assert!(matches!(err, Error::RenewalFailed(_)), "got: {err:?}");
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.pending_waiters(), 0);
        assert!(store.read().is_none());
        assert_eq!(lost.count(), 1);

        // nothing left to renew with, and the coordinator is usable again
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            coordinator.handle_expiry("req_2"),
        )
        .await
        .expect("second expiry must not hang")
        .unwrap_err();
        assert!(matches!(err, Error::NoSession(_)), "got: {err:?}");
        assert_eq!(transport.renew_count(), 1);
    }
}
