//! Expiring bearer-token sessions over the in-memory backend.

use std::sync::atomic::{AtomicBool, Ordering};

use leaselink::auth::{AuthError, AuthSession, SessionToken};
use leaselink_proto::ids::PrincipalId;

use crate::store::Backend;

/// An [`AuthSession`] whose tokens are registered with (and revocable by)
/// the in-memory backend.
///
/// Refresh can be disabled to exercise the hard-failure path, and the
/// session can start logged out to exercise the unauthenticated path.
pub struct TestSession {
    backend: Backend,
    principal: PrincipalId,
    current: parking_lot::Mutex<Option<String>>,
    refresh_enabled: AtomicBool,
}

impl TestSession {
    /// Creates a logged-in session for `principal` with a fresh token.
    #[must_use]
    pub fn logged_in(backend: &Backend, principal: PrincipalId) -> Self {
        let token = backend.register_token(&principal);
        Self {
            backend: backend.clone(),
            principal,
            current: parking_lot::Mutex::new(Some(token)),
            refresh_enabled: AtomicBool::new(true),
        }
    }

    /// Creates a session with no token at all.
    #[must_use]
    pub fn logged_out(backend: &Backend, principal: PrincipalId) -> Self {
        Self {
            backend: backend.clone(),
            principal,
            current: parking_lot::Mutex::new(None),
            refresh_enabled: AtomicBool::new(true),
        }
    }

    /// Makes every future refresh fail, as a revoked account would.
    pub fn disable_refresh(&self) {
        self.refresh_enabled.store(false, Ordering::SeqCst);
    }

    /// Drops the current token without registering a new one.
    pub fn log_out(&self) {
        *self.current.lock() = None;
    }

    /// The principal this session authenticates.
    #[must_use]
    pub const fn principal(&self) -> &PrincipalId {
        &self.principal
    }
}

impl AuthSession for TestSession {
    async fn token(&self) -> Result<SessionToken, AuthError> {
        self.current
            .lock()
            .clone()
            .map(SessionToken::new)
            .ok_or(AuthError::NotAuthenticated)
    }

    async fn refresh(&self) -> Result<SessionToken, AuthError> {
        if !self.refresh_enabled.load(Ordering::SeqCst) {
            return Err(AuthError::RefreshFailed("refresh disabled".into()));
        }
        let token = self.backend.register_token(&self.principal);
        *self.current.lock() = Some(token.clone());
        Ok(SessionToken::new(token))
    }
}
