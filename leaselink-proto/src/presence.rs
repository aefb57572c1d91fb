//! Ephemeral presence records for the per-thread presence channel.
//!
//! Presence state exists only while a client is subscribed to a thread's
//! presence room. It is never persisted; leaving the channel clears the
//! tracked state on the backend side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::PrincipalId;

/// One participant's presence record within a thread's presence room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    /// The participant this record describes.
    pub principal: PrincipalId,
    /// Display name broadcast alongside the typing flag.
    pub display_name: String,
    /// Whether the participant is currently composing a message.
    pub typing: bool,
    /// When this record was last refreshed.
    pub updated_at: DateTime<Utc>,
}

impl PresenceState {
    /// Returns true if the typing flag is set and the record was refreshed
    /// within `idle_window`.
    ///
    /// A typing flag older than the idle window counts as stale and is
    /// treated as not typing, so a crashed peer never leaves a permanent
    /// indicator behind.
    #[must_use]
    pub fn typing_within(&self, idle_window: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.typing && now.signed_duration_since(self.updated_at) <= idle_window
    }
}
