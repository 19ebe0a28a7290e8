//! Orchestrator facade
//!
//! Bundles the session store, transport, refresh coordinator and session-lost
//! hook behind the two entry points callers use: `send` for API calls and
//! `poll` for waiting on server-side work. Login and logout are the only
//! session writes that do not come from renewal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use session::{Credential, SessionStore};
use tracing::info;
use transport::{ApiRequest, ApiResponse, Transport};

use crate::error::Result;
use crate::lost::SessionLost;
use crate::pipeline::RequestPipeline;
use crate::poll::PollHandle;

/// Shared entry point for every API call made under one session.
///
/// Cheap to clone; clones share the store and the renewal state.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<SessionStore>,
    pipeline: RequestPipeline,
    session_lost: Arc<dyn SessionLost>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        session_lost: Arc<dyn SessionLost>,
    ) -> Self {
        let pipeline = RequestPipeline::new(store.clone(), transport, session_lost.clone());
        Self {
            store,
            pipeline,
            session_lost,
        }
    }

    /// Send `request` under the current session.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.pipeline.send(request).await
    }

    /// Send `request` and decode a JSON response body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        Ok(response.json()?)
    }

    /// Start polling; see [`crate::poll::poll`].
    pub fn poll<S, F, Fut, P>(
        &self,
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
        crate::poll::poll(resource_id, fetch_status, is_terminal, interval, max_attempts)
    }

    /// Store the pair issued by a successful login.
    pub fn login(&self, credential: &Credential) {
        self.store.write(credential);
        info!(has_refresh = credential.refresh.is_some(), "logged in");
    }

    /// Drop the session and run the session-lost hook.
    pub fn logout(&self) {
        self.store.clear();
        info!("logged out");
        self.session_lost.on_session_lost();
    }

    pub fn session(&self) -> Option<Credential> {
        self.store.read()
    }

    pub fn has_session(&self) -> bool {
        self.store.has_session()
    }

    /// Whether a credential renewal is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.pipeline.coordinator().is_refreshing()
    }
}
