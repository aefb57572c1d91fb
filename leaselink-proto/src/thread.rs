//! Thread model and the denormalized lookup shapes used to enrich it.
//!
//! A [`Thread`] is a conversation between exactly one host and one guest,
//! optionally attached to a listing. Threads are created implicitly by the
//! first message between a pair (or pair + listing) and never deleted;
//! every new message bumps `last_modified` and the preview text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ListingId, PrincipalId, ThreadId};

/// A two-party conversation container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Unique thread id.
    pub id: ThreadId,
    /// The host-side participant.
    pub host: PrincipalId,
    /// The guest-side participant.
    pub guest: PrincipalId,
    /// The listing this conversation is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingId>,
    /// When the thread last received a message.
    pub last_modified: DateTime<Utc>,
    /// Denormalized preview of the most recent message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
}

impl Thread {
    /// Returns the participant that is not `me`.
    ///
    /// The roles are symmetric for display purposes: the counterpart is
    /// always resolved relative to the calling principal. If `me` is not a
    /// participant at all (an automated sender reading on behalf of the
    /// system), the host is returned.
    #[must_use]
    pub fn counterpart(&self, me: &PrincipalId) -> &PrincipalId {
        if self.host == *me { &self.guest } else { &self.host }
    }

    /// Returns true if `principal` is one of the two participants.
    #[must_use]
    pub fn involves(&self, principal: &PrincipalId) -> bool {
        self.host == *principal || self.guest == *principal
    }
}

/// Denormalized counterpart/listing summary returned with a message page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    /// Display name of the counterpart participant.
    pub counterpart_name: String,
    /// Title of the associated listing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_title: Option<String>,
    /// Whether the conversation has been archived by either side.
    pub archived: bool,
}

/// Public profile fields used when enriching a thread list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// The principal this profile belongs to.
    pub id: PrincipalId,
    /// Display name shown next to threads and typing indicators.
    pub display_name: String,
    /// Avatar image location, if the user uploaded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Listing fields used when enriching a thread list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCard {
    /// The listing this card describes.
    pub id: ListingId,
    /// Listing title shown in the thread list.
    pub title: String,
}
