//! In-memory transport for orchestrator tests

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use session::{Credential, KeyValueStore, MemoryStore, REFRESH_TOKEN_KEY, SessionStore};
use tokio::sync::Notify;
use transport::{ApiRequest, ApiResponse, RenewedTokens, SendError, Transport};

use crate::lost::SessionLost;

const AUTHORIZATION: &str = "authorization";

/// Accepts exactly one bearer token; everything else is a 401.
pub struct FakeTransport {
    valid_token: Mutex<String>,
    renewal: Mutex<std::result::Result<RenewedTokens, SendError>>,
    renew_gate: Mutex<Option<Arc<Notify>>>,
    reject_all: AtomicBool,
    panic_renew: AtomicBool,
    failures: Mutex<Vec<(String, SendError)>>,
    pub renew_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub sent_tokens: Mutex<Vec<Option<String>>>,
}

impl FakeTransport {
    /// Accept `valid`; renewal succeeds with `renewed` and no rotation.
    pub fn new(valid: &str, renewed: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(valid.to_owned()),
            renewal: Mutex::new(Ok(RenewedTokens {
                access: renewed.to_owned(),
                refresh: None,
            })),
            renew_gate: Mutex::new(None),
            reject_all: AtomicBool::new(false),
            panic_renew: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
            renew_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            sent_tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn rotate_refresh(&self, refresh: &str) {
        if let Ok(tokens) = &mut *self.renewal.lock().unwrap() {
            tokens.refresh = Some(refresh.to_owned());
        }
    }

    pub fn fail_renewal(&self, err: SendError) {
        *self.renewal.lock().unwrap() = Err(err);
    }

    /// Renewal waits until the returned `Notify` is signalled.
    pub fn hold_renewal(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.renew_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Every request is answered with 401, even with a renewed token.
    pub fn reject_everything(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    /// The renewal call panics instead of returning.
    pub fn panic_on_renew(&self) {
        self.panic_renew.store(true, Ordering::SeqCst);
    }

    /// Requests to `path` fail with `err` regardless of credentials.
    pub fn fail_path(&self, path: &str, err: SendError) {
        self.failures.lock().unwrap().push((path.to_owned(), err));
    }

    pub fn renew_count(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    fn respond(&self, request: ApiRequest) -> std::result::Result<ApiResponse, SendError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let token = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);
        self.sent_tokens.lock().unwrap().push(token.clone());

        if let Some((_, err)) = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| *path == request.path)
        {
            return Err(err.clone());
        }

        let valid = self.valid_token.lock().unwrap().clone();
        if self.reject_all.load(Ordering::SeqCst) || token.as_deref() != Some(valid.as_str()) {
            return Err(SendError::ExpiredCredential(
                r#"{"detail":"Given token not valid for any token type","code":"token_not_valid"}"#
                    .into(),
            ));
        }

        Ok(ApiResponse::from_json(
            200,
            &serde_json::json!({ "path": request.path, "token": valid }),
        ))
    }
}

impl Transport for FakeTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.respond(request)
        })
    }

    fn renew<'a>(
        &'a self,
        _refresh: &'a str,
    ) -> Pin<Box<dyn Future<Output = transport::Result<RenewedTokens>> + Send + 'a>> {
        Box::pin(async move {
            self.renew_calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_renew.load(Ordering::SeqCst) {
                panic!("token endpoint client blew up");
            }
            let gate = self.renew_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let outcome = self.renewal.lock().unwrap().clone();
            if let Ok(tokens) = &outcome {
                *self.valid_token.lock().unwrap() = tokens.access.clone();
            }
            outcome
        })
    }
}

/// Counts session-lost notifications.
#[derive(Default)]
pub struct LostCounter(pub AtomicUsize);

impl LostCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl SessionLost for LostCounter {
    fn on_session_lost(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A memory-backed session holding `access`/`refresh`.
pub fn session_with(access: Option<&str>, refresh: Option<&str>) -> Arc<SessionStore> {
    let backend = Arc::new(MemoryStore::new());
    let store = Arc::new(SessionStore::new(backend.clone()));
    match (access, refresh) {
        (Some(access), refresh) => {
            store.write(&Credential::new(access, refresh.map(str::to_owned)));
        }
        (None, Some(refresh)) => backend.save(REFRESH_TOKEN_KEY, refresh),
        (None, None) => {}
    }
    store
}
