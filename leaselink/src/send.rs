//! Send coordinator: optimistic writes with rollback.
//!
//! A send validates locally, inserts an optimistic timeline entry, clears
//! the local typing signal, and only then talks to the backend. The
//! client-minted message id is the idempotency key, so the receipt and the
//! feed event reconcile against the optimistic entry no matter which lands
//! first. On failure the optimistic entry is rolled back and the caller's
//! draft stays untouched — the coordinator only ever reports success.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use leaselink_proto::api::{SendReceipt, SendRequest, SendTarget};
use leaselink_proto::ids::{ListingId, MessageId, PrincipalId, ThreadId};
use leaselink_proto::message::{Message, ValidationError, validate_body};

use crate::auth::{AuthError, AuthRetryError, AuthSession, with_auth_retry};
use crate::backend::{ApiError, MarketplaceApi};
use crate::timeline::{Provenance, SharedTimeline};

/// Errors from the send pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The body failed local validation; nothing was inserted or sent.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Another send is still in flight; sends are not queued.
    #[error("another send is in flight")]
    InFlight,

    /// No thread is selected to send into.
    #[error("no thread selected")]
    NoSelection,

    /// The session could not produce a usable token.
    #[error("session error: {0}")]
    Auth(#[from] AuthError),

    /// The backend refused or could not take the message. The optimistic
    /// entry has been rolled back; retrying is safe.
    #[error("send failed: {0}")]
    Api(#[from] ApiError),
}

impl From<AuthRetryError> for SendError {
    fn from(e: AuthRetryError) -> Self {
        match e {
            AuthRetryError::Auth(e) => Self::Auth(e),
            AuthRetryError::Api(e) => Self::Api(e),
        }
    }
}

/// Seam through which a send clears the local typing indicator.
///
/// Sending implies the participant stopped composing, so the coordinator
/// fires this before the network call. The unit impl is a no-op for
/// callers that do not track typing.
pub trait TypingSignal: Send + Sync {
    /// Clears the local typing flag and broadcasts a stop if one was up.
    fn clear(&self);
}

impl TypingSignal for () {
    fn clear(&self) {}
}

/// Releases the in-flight flag on every exit path.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Write side of a conversation: one send at a time, optimistic-first.
#[derive(Debug)]
pub struct SendCoordinator<A, S, T = ()> {
    api: Arc<A>,
    session: Arc<S>,
    me: PrincipalId,
    timeline: SharedTimeline,
    typing: T,
    in_flight: AtomicBool,
}

impl<A: MarketplaceApi, S: AuthSession, T: TypingSignal> SendCoordinator<A, S, T> {
    /// Creates a coordinator sending as `me` into the shared timeline.
    pub fn new(api: Arc<A>, session: Arc<S>, me: PrincipalId, timeline: SharedTimeline, typing: T) -> Self {
        Self {
            api,
            session,
            me,
            timeline,
            typing,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Sends a message into an existing thread.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`]; on any failure the optimistic entry has been
    /// rolled back and the send can be retried.
    pub async fn send(&self, thread: &ThreadId, body: &str) -> Result<SendReceipt, SendError> {
        self.dispatch(SendTarget::Existing(thread.clone()), body).await
    }

    /// Opens a conversation with a first-contact message.
    ///
    /// No optimistic entry is made — the thread does not exist yet, so
    /// there is no timeline to insert into. The receipt names the created
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`]; retrying a failed first contact is safe.
    pub async fn send_first_contact(
        &self,
        recipient: &PrincipalId,
        listing: Option<ListingId>,
        body: &str,
    ) -> Result<SendReceipt, SendError> {
        self.dispatch(
            SendTarget::FirstContact {
                recipient: recipient.clone(),
                listing,
            },
            body,
        )
        .await
    }

    /// Whether a send is currently in flight.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    async fn dispatch(&self, target: SendTarget, body: &str) -> Result<SendReceipt, SendError> {
        let trimmed = validate_body(body)?.to_string();

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SendError::InFlight);
        }
        let _guard = FlightGuard(&self.in_flight);

        let id = MessageId::new();

        // Optimistic entry only for an existing thread; first contact has
        // no timeline yet.
        let optimistic = if let SendTarget::Existing(thread) = &target {
            let message = Message {
                id,
                thread_id: thread.clone(),
                sender: self.me.clone(),
                body: trimmed.clone(),
                created_at: Utc::now(),
                call_to_action: None,
                warning: None,
            };
            self.timeline
                .lock()
                .insert(message.clone(), Provenance::Optimistic);
            true
        } else {
            false
        };

        self.typing.clear();

        let request = SendRequest {
            id,
            target,
            body: trimmed,
        };
        let result = with_auth_retry(self.session.as_ref(), |token| {
            let api = Arc::clone(&self.api);
            let request = request.clone();
            async move { api.send_message(&token, request).await }
        })
        .await;

        match result {
            Ok(receipt) => {
                if optimistic {
                    self.timeline
                        .lock()
                        .insert(receipt.message.clone(), Provenance::Confirmed);
                }
                tracing::debug!(message_id = %id, "send acknowledged");
                Ok(receipt)
            }
            Err(e) => {
                if optimistic {
                    self.timeline.lock().remove(&id);
                }
                tracing::warn!(message_id = %id, error = %e, "send failed, rolled back");
                Err(e.into())
            }
        }
    }
}
