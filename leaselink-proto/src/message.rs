//! Message model for the LeaseLink conversation core.
//!
//! A [`Message`] is one append-only, immutable unit of conversation content
//! within a thread, strictly ordered by creation time. Body validation
//! happens client-side before any network call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, PrincipalId, ThreadId};

/// Maximum allowed message body length in characters.
pub const MAX_BODY_CHARS: usize = 1000;

/// A structured pointer to a follow-up workflow, embedded in a message.
///
/// The UI resolves these into interactive prompts (approve a date change,
/// leave a review). The messaging core only carries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallToAction {
    /// A request to change the dates of an existing booking.
    DateChange {
        /// The booking the date change applies to.
        booking_id: String,
    },
    /// A prompt to review the counterpart after a completed stay.
    ReviewPrompt {
        /// The booking the review refers to.
        booking_id: String,
    },
}

/// One unit of conversation content within a thread.
///
/// Messages are append-only and immutable once delivered; the client never
/// edits or deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id, client-minted at send time and echoed by the server.
    pub id: MessageId,
    /// The thread this message belongs to.
    pub thread_id: ThreadId,
    /// Who sent this message (a participant or an automated system sender).
    pub sender: PrincipalId,
    /// The message text.
    pub body: String,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    /// Optional pointer to a follow-up workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_to_action: Option<CallToAction>,
    /// Optional system warning annotation (e.g. off-platform payment notice).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Message {
    /// Returns true if this message was authored by `principal`.
    #[must_use]
    pub fn authored_by(&self, principal: &PrincipalId) -> bool {
        self.sender == *principal
    }
}

/// Error returned when a message body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Body is empty after trimming.
    #[error("message body is empty")]
    Empty,
    /// Body exceeds the maximum allowed length.
    #[error("message body too long ({chars} characters, max {max})")]
    TooLong {
        /// Actual length of the body in characters.
        chars: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },
}

/// Validates a message body for sending, returning the trimmed text.
///
/// The body must be non-empty after trimming and at most [`MAX_BODY_CHARS`]
/// characters long. Rejection happens before any optimistic insert or
/// network call.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for a blank body, or
/// [`ValidationError::TooLong`] when the trimmed body exceeds the limit.
pub fn validate_body(body: &str) -> Result<&str, ValidationError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let chars = trimmed.chars().count();
    if chars > MAX_BODY_CHARS {
        return Err(ValidationError::TooLong {
            chars,
            max: MAX_BODY_CHARS,
        });
    }
    Ok(trimmed)
}
