//! Request pipeline
//!
//! Every API call goes through `RequestPipeline::send`: attach the current
//! credential, dispatch, and on an expired-credential failure recover at most
//! once. Recovery either reuses a credential that was stored while this
//! request was in flight, or waits on the refresh coordinator. The replay is
//! sent directly and its outcome is final: a second expiry is a terminal
//! failure, never another renewal.

use std::sync::Arc;

use session::{Credential, SessionStore, decorate};
use tracing::{Span, debug, field, instrument, warn};
use transport::{ApiRequest, ApiResponse, SendError, Transport};

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::lost::SessionLost;

/// Credential-aware request dispatch.
#[derive(Clone)]
pub struct RequestPipeline {
    store: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
    session_lost: Arc<dyn SessionLost>,
}

impl RequestPipeline {
    pub fn new(
        store: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        session_lost: Arc<dyn SessionLost>,
    ) -> Self {
        let coordinator =
            RefreshCoordinator::new(store.clone(), transport.clone(), session_lost.clone());
        Self {
            store,
            transport,
            coordinator,
            session_lost,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send a request with the current credential, renewing once on expiry.
    #[instrument(
        skip_all,
        fields(request_id = field::Empty, method = %request.method, path = %request.path)
    )]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        Span::current().record("request_id", request_id.as_str());

        let credential = self.store.read();
        let outbound = decorate(&request, credential.as_ref());

        match self.transport.send(outbound).await {
            Ok(response) => Ok(response),
            Err(SendError::ExpiredCredential(body)) => {
                self.recover(&request, &request_id, credential, body).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Handle the first expiry of `request`.
    async fn recover(
        &self,
        request: &ApiRequest,
        request_id: &str,
        used: Option<Credential>,
        body: String,
    ) -> Result<ApiResponse> {
        if request.skip_refresh {
            debug!("expired credential on token endpoint, not renewing");
            return Err(Error::ExpiredCredential(body));
        }

        let Some(current) = self.store.read() else {
            warn!("credential expired with no session, clearing");
            self.store.clear();
            self.session_lost.on_session_lost();
            return Err(Error::NoSession(body));
        };

        let credential = match used {
            Some(used) if used.access == current.access => {
                self.coordinator.handle_expiry(request_id).await?
            }
            // Sent without a credential, or renewed by another request while
            // this one was in flight
            _ => {
                debug!("session changed since dispatch, replaying with current credential");
                current
            }
        };

        metrics::counter!("session_replays_total").increment(1);
        let replay = decorate(request, Some(&credential));
        match self.transport.send(replay).await {
            Ok(response) => Ok(response),
            Err(SendError::ExpiredCredential(body)) => {
                warn!("replayed request rejected again, giving up");
                Err(Error::ExpiredCredential(body))
            }
            Err(e) => Err(e.into()),
        }
    }
}
