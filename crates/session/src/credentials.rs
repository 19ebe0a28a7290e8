//! The current credential pair
//!
//! `SessionStore` is the only mutable state shared by the request pipeline
//! and the refresh coordinator. The access and refresh tokens live under two
//! keys of a `KeyValueStore`; a store-level lock spans both keys so the pair
//! is always written, cleared, and read as one unit.

use std::sync::{Arc, Mutex, PoisonError};

use common::Secret;
use tracing::debug;

use crate::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::store::KeyValueStore;

/// An access token plus the refresh token that can renew it.
///
/// Debug output is redacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access: Secret<String>,
    pub refresh: Option<Secret<String>>,
}

impl Credential {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: Secret::new(access.into()),
            refresh: refresh.map(Secret::new),
        }
    }
}

/// Synchronous credential holder over a key-value backend.
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
    pair_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            pair_lock: Mutex::new(()),
        }
    }

    /// The current credential, or `None` when no access token is stored.
    pub fn read(&self) -> Option<Credential> {
        let _pair = self.pair_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let access = self.backend.load(ACCESS_TOKEN_KEY)?;
        let refresh = self.backend.load(REFRESH_TOKEN_KEY);
        Some(Credential::new(access, refresh))
    }

    /// Whether an access token is stored.
    pub fn has_session(&self) -> bool {
        let _pair = self.pair_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.load(ACCESS_TOKEN_KEY).is_some()
    }

    /// The stored refresh token, independent of the access token.
    pub fn refresh_token(&self) -> Option<Secret<String>> {
        let _pair = self.pair_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.load(REFRESH_TOKEN_KEY).map(Secret::new)
    }

    /// Replace the stored pair. A credential without a refresh token removes
    /// any previously stored one.
    pub fn write(&self, credential: &Credential) {
        let _pair = self.pair_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.apply(&[
            (ACCESS_TOKEN_KEY, Some(credential.access.expose().as_str())),
            (
                REFRESH_TOKEN_KEY,
                credential.refresh.as_ref().map(|r| r.expose().as_str()),
            ),
        ]);
        debug!(has_refresh = credential.refresh.is_some(), "session written");
    }

    /// Store a renewed access token.
    ///
    /// `rotated` replaces the refresh token when the server issued a new one;
    /// otherwise the stored refresh token is kept. Returns the pair as stored.
    pub fn renew(&self, access: String, rotated: Option<String>) -> Credential {
        let _pair = self.pair_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let refresh = rotated.or_else(|| self.backend.load(REFRESH_TOKEN_KEY));
        match &refresh {
            Some(refresh) => self.backend.apply(&[
                (ACCESS_TOKEN_KEY, Some(access.as_str())),
                (REFRESH_TOKEN_KEY, Some(refresh.as_str())),
            ]),
            None => self.backend.apply(&[(ACCESS_TOKEN_KEY, Some(access.as_str()))]),
        }
        debug!("session renewed");
        Credential::new(access, refresh)
    }

    /// Remove both tokens.
    pub fn clear(&self) {
        let _pair = self.pair_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend
            .apply(&[(ACCESS_TOKEN_KEY, None), (REFRESH_TOKEN_KEY, None)]);
        debug!("session cleared");
    }
}
