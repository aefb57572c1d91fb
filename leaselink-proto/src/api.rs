//! Request and response shapes for the marketplace write and read boundary.

use serde::{Deserialize, Serialize};

use crate::ids::{ListingId, MessageId, PrincipalId, ThreadId};
use crate::message::Message;
use crate::thread::ThreadInfo;

/// One page of messages for a thread, together with its denormalized info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Messages in ascending creation order.
    pub messages: Vec<Message>,
    /// Counterpart and listing summary for the thread.
    pub thread_info: ThreadInfo,
}

/// Where a send is directed.
///
/// First contact carries no thread id: the backend creates the thread
/// implicitly (at most one per participant pair and listing) and reports it
/// back in the [`SendReceipt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum SendTarget {
    /// Append to an existing thread.
    Existing(ThreadId),
    /// Open a conversation with a counterpart, optionally about a listing.
    FirstContact {
        /// The participant to contact.
        recipient: PrincipalId,
        /// The listing the conversation is about, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        listing: Option<ListingId>,
    },
}

/// A message submission.
///
/// The id is minted by the client and echoed by the server, so it doubles
/// as the idempotency key that reconciles the optimistic entry with the
/// authoritative one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Client-minted message id.
    pub id: MessageId,
    /// Destination thread or first-contact counterpart.
    pub target: SendTarget,
    /// Validated message body.
    pub body: String,
}

/// The server's acknowledgement of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// The stored message, carrying the echoed client id and the
    /// authoritative timestamp.
    pub message: Message,
    /// Set when the send was a first contact and a thread was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_thread: Option<ThreadId>,
}
