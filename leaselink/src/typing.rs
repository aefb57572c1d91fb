//! Local typing-indicator state machine.
//!
//! Tracks whether the local participant counts as "typing" and tells the
//! caller when a start or stop signal should be broadcast to the presence
//! room. The tracker is pure: callers pass the current instant, so tests
//! never sleep.

use std::time::{Duration, Instant};

/// How long after the last keystroke the typing flag stays up.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_millis(2000);

/// Debounced typing state for the local participant.
#[derive(Debug)]
pub struct TypingTracker {
    idle_window: Duration,
    expires_at: Option<Instant>,
}

impl TypingTracker {
    /// Creates a tracker with the given idle window.
    #[must_use]
    pub const fn new(idle_window: Duration) -> Self {
        Self {
            idle_window,
            expires_at: None,
        }
    }

    /// Records a keystroke at `now`, refreshing the idle window.
    ///
    /// Returns `true` when this keystroke started a typing burst and a
    /// start signal should be broadcast; refreshing an active burst
    /// returns `false` (the flag is already up).
    pub fn note_keystroke(&mut self, now: Instant) -> bool {
        let was_typing = self.is_typing_at(now);
        self.expires_at = Some(now + self.idle_window);
        !was_typing
    }

    /// Advances the clock to `now`.
    ///
    /// Returns `true` when the idle window just elapsed and a stop signal
    /// should be broadcast.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) if now >= deadline => {
                self.expires_at = None;
                true
            }
            _ => false,
        }
    }

    /// Explicit stop, used when a message is sent (sending implies the
    /// participant is no longer composing).
    ///
    /// Returns `true` when the flag was up and a stop signal should be
    /// broadcast.
    pub fn clear(&mut self) -> bool {
        self.expires_at.take().is_some()
    }

    /// Whether the local participant currently counts as typing.
    #[must_use]
    pub fn is_typing_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now < deadline)
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_WINDOW)
    }
}
