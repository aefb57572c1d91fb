//! Session boundary for the hosted marketplace backend.
//!
//! The core never implements authentication itself; it holds an
//! [`AuthSession`] that can produce a bearer token and refresh it when the
//! backend rejects one. The retry policy is fixed: refresh exactly once,
//! retry exactly once, then fail hard.

use crate::backend::ApiError;

/// Bearer credential presented to every backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Creates a token from its opaque string form.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the opaque string form of this token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Errors surfaced by the session boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// There is no active session at all (never logged in, or logged out).
    #[error("no active session")]
    NotAuthenticated,

    /// The refresh endpoint rejected the attempt.
    #[error("session refresh failed: {0}")]
    RefreshFailed(String),

    /// The backend rejected a freshly refreshed token.
    #[error("session rejected after refresh")]
    Expired,
}

/// Source of bearer tokens for backend calls.
///
/// Implementations wrap whatever identity provider the host application
/// uses. The core only needs the two operations below.
pub trait AuthSession: Send + Sync {
    /// Returns the current bearer token.
    fn token(&self) -> impl std::future::Future<Output = Result<SessionToken, AuthError>> + Send;

    /// Obtains a fresh token, invalidating the previous one.
    fn refresh(&self) -> impl std::future::Future<Output = Result<SessionToken, AuthError>> + Send;
}

/// Error from an operation run under the refresh-once retry policy.
#[derive(Debug, thiserror::Error)]
pub enum AuthRetryError {
    /// The session itself failed (no session, refresh rejected, or the
    /// backend rejected a freshly refreshed token).
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The operation failed for a non-authentication reason.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Runs `op` with the current token, refreshing and retrying exactly once
/// on [`ApiError::Unauthenticated`].
///
/// A second `Unauthenticated` after a successful refresh is a hard
/// [`AuthError::Expired`] — the policy never loops.
///
/// # Errors
///
/// Returns [`AuthRetryError::Auth`] when the session cannot produce a
/// usable token, or [`AuthRetryError::Api`] when the operation fails for
/// any other reason.
pub async fn with_auth_retry<S, T, Op, Fut>(session: &S, mut op: Op) -> Result<T, AuthRetryError>
where
    S: AuthSession,
    Op: FnMut(SessionToken) -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>>,
{
    let token = match session.token().await {
        Ok(token) => token,
        Err(AuthError::NotAuthenticated) => {
            tracing::debug!("no current token, refreshing before first attempt");
            session.refresh().await?
        }
        Err(e) => return Err(e.into()),
    };

    match op(token).await {
        Ok(value) => Ok(value),
        Err(ApiError::Unauthenticated) => {
            tracing::debug!("token rejected, refreshing once");
            let fresh = session.refresh().await?;
            match op(fresh).await {
                Ok(value) => Ok(value),
                Err(ApiError::Unauthenticated) => Err(AuthError::Expired.into()),
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}
