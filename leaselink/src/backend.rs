//! Backend seam for the hosted marketplace service.
//!
//! Two traits cover everything the core needs from the outside world:
//! [`MarketplaceApi`] for request/response operations and [`LiveChannels`]
//! for the realtime surfaces (the global insert feed and per-thread
//! presence rooms). Concrete implementations include the HTTP/WebSocket
//! client of the production service and the in-memory reference backend
//! used by the integration tests.

use leaselink_proto::api::{MessagePage, SendReceipt, SendRequest};
use leaselink_proto::ids::{ListingId, PrincipalId, ThreadId};
use leaselink_proto::presence::PresenceState;
use leaselink_proto::thread::{ListingCard, Profile, Thread};
use tokio::sync::{broadcast, mpsc, watch};

use crate::auth::SessionToken;

/// Errors returned by request/response backend operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The bearer token was missing, expired, or revoked.
    #[error("session token rejected")]
    Unauthenticated,

    /// The backend could not be reached or answered with a server error.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The requested entity does not exist or is not visible to the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend understood the request and refused it.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Errors returned by the realtime channel surfaces.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The channel connection has been closed.
    #[error("channel closed")]
    Closed,

    /// A channel operation timed out before completing.
    #[error("channel operation timed out")]
    Timeout,

    /// The backend refused the subscription.
    #[error("subscription rejected: {0}")]
    Rejected(String),
}

/// Request/response operations against the marketplace backend.
///
/// Every call takes the caller's bearer token; implementations never cache
/// or refresh tokens themselves — that is the session boundary's job.
pub trait MarketplaceApi: Send + Sync {
    /// Lists every thread the caller participates in, in no particular
    /// order.
    fn list_threads(
        &self,
        token: &SessionToken,
    ) -> impl std::future::Future<Output = Result<Vec<Thread>, ApiError>> + Send;

    /// Fetches a thread's messages (ascending creation order) together
    /// with its denormalized counterpart/listing info.
    fn list_messages(
        &self,
        token: &SessionToken,
        thread: &ThreadId,
    ) -> impl std::future::Future<Output = Result<MessagePage, ApiError>> + Send;

    /// Stores a message, creating the thread implicitly on first contact.
    ///
    /// The request id is an idempotency key: the stored message carries it
    /// verbatim, so a resend of the same request is a no-op server-side.
    fn send_message(
        &self,
        token: &SessionToken,
        request: SendRequest,
    ) -> impl std::future::Future<Output = Result<SendReceipt, ApiError>> + Send;

    /// Looks up public profiles for a batch of principals in one call.
    ///
    /// Unknown ids are silently absent from the result.
    fn profiles_by_ids(
        &self,
        token: &SessionToken,
        ids: &[PrincipalId],
    ) -> impl std::future::Future<Output = Result<Vec<Profile>, ApiError>> + Send;

    /// Looks up listing cards for a batch of listings in one call.
    ///
    /// Unknown ids are silently absent from the result.
    fn listings_by_ids(
        &self,
        token: &SessionToken,
        ids: &[ListingId],
    ) -> impl std::future::Future<Output = Result<Vec<ListingCard>, ApiError>> + Send;
}

/// A live subscription to the global message insert feed.
///
/// The feed delivers every insert system-wide as a raw JSON row — the
/// backend cannot filter by thread, so the subscriber filters client-side
/// after decoding.
#[derive(Debug)]
pub struct FeedSubscription {
    /// Raw insert rows, in commit order.
    pub rows: broadcast::Receiver<serde_json::Value>,
}

impl FeedSubscription {
    /// Wraps a broadcast receiver of raw insert rows.
    #[must_use]
    pub const fn new(rows: broadcast::Receiver<serde_json::Value>) -> Self {
        Self { rows }
    }
}

/// A live membership in one thread's presence room.
///
/// The roster watch carries the merged state of everyone currently in the
/// room, the local participant included. Dropping the subscription leaves
/// the room and clears the tracked state on the backend.
#[derive(Debug)]
pub struct PresenceSubscription {
    /// Merged roster of everyone currently in the room.
    pub roster: watch::Receiver<Vec<PresenceState>>,
    publisher: mpsc::Sender<bool>,
}

impl PresenceSubscription {
    /// Builds a subscription from its roster receiver and typing-flag
    /// publisher.
    #[must_use]
    pub const fn new(
        roster: watch::Receiver<Vec<PresenceState>>,
        publisher: mpsc::Sender<bool>,
    ) -> Self {
        Self { roster, publisher }
    }

    /// Publishes the local participant's typing flag to the room.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the room is gone.
    pub fn set_typing(&self, typing: bool) -> Result<(), ChannelError> {
        self.publisher
            .try_send(typing)
            .map_err(|_| ChannelError::Closed)
    }

    /// Returns a handle that can publish the typing flag after this
    /// subscription has been moved into the live tasks.
    #[must_use]
    pub fn publisher(&self) -> mpsc::Sender<bool> {
        self.publisher.clone()
    }
}

/// Realtime channel surfaces of the marketplace backend.
pub trait LiveChannels: Send + Sync {
    /// Subscribes to the global insert feed.
    fn subscribe_inserts(
        &self,
    ) -> impl std::future::Future<Output = Result<FeedSubscription, ChannelError>> + Send;

    /// Joins a thread's presence room, announcing `me` as the local
    /// participant's initial state.
    fn join_presence(
        &self,
        thread: &ThreadId,
        me: PresenceState,
    ) -> impl std::future::Future<Output = Result<PresenceSubscription, ChannelError>> + Send;
}
