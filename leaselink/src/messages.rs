//! Message repository: fetching one thread's page of messages.

use std::sync::Arc;

use leaselink_proto::api::MessagePage;
use leaselink_proto::ids::ThreadId;

use crate::auth::{AuthError, AuthRetryError, AuthSession, with_auth_retry};
use crate::backend::{ApiError, MarketplaceApi};

/// Errors from fetching a thread's messages.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The session could not produce a usable token.
    #[error("session error: {0}")]
    Auth(#[from] AuthError),

    /// The fetch itself failed.
    #[error("message fetch failed: {0}")]
    Api(#[from] ApiError),
}

impl From<AuthRetryError> for FetchError {
    fn from(e: AuthRetryError) -> Self {
        match e {
            AuthRetryError::Auth(e) => Self::Auth(e),
            AuthRetryError::Api(e) => Self::Api(e),
        }
    }
}

/// Read side of a single conversation.
#[derive(Debug)]
pub struct MessageRepository<A, S> {
    api: Arc<A>,
    session: Arc<S>,
}

impl<A: MarketplaceApi, S: AuthSession> MessageRepository<A, S> {
    /// Creates a repository over the given backend and session.
    pub const fn new(api: Arc<A>, session: Arc<S>) -> Self {
        Self { api, session }
    }

    /// Fetches the full message page for a thread, oldest first, together
    /// with its denormalized info.
    ///
    /// An expired token is refreshed and retried once before this fails.
    /// Callers isolate the failure: a broken conversation never takes the
    /// thread list down with it.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the page cannot be fetched.
    pub async fn fetch(&self, thread: &ThreadId) -> Result<MessagePage, FetchError> {
        let page = with_auth_retry(self.session.as_ref(), |token| {
            let api = Arc::clone(&self.api);
            let thread = thread.clone();
            async move { api.list_messages(&token, &thread).await }
        })
        .await?;
        Ok(page)
    }
}
