//! Shared in-memory message timeline for the selected thread.
//!
//! Both writers — the send coordinator (optimistic entries and receipts)
//! and the live feed subscriber (authoritative rows) — go through the same
//! insert discipline: identity-keyed, append-if-absent, ordered by
//! `(created_at, id)`. Because the id is the idempotency key, the insert is
//! commutative and idempotent, and it does not matter whether the receipt
//! or the feed event lands first.

use std::collections::HashSet;
use std::sync::Arc;

use leaselink_proto::ids::MessageId;
use leaselink_proto::message::Message;

/// Where a timeline entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Inserted locally at send time, not yet acknowledged.
    Optimistic,
    /// Acknowledged by the backend (receipt or feed row).
    Confirmed,
}

/// What an insert did to the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The id was new; the entry was inserted in order.
    Appended,
    /// An optimistic entry with the same id was upgraded in place.
    Confirmed,
    /// The id was already present with equal or higher provenance; no-op.
    Duplicate,
}

/// One message in the timeline, tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The message content.
    pub message: Message,
    /// Whether the entry is optimistic or backend-acknowledged.
    pub provenance: Provenance,
}

/// Ordered, deduplicated message store for one selected thread.
#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<Entry>,
    ids: HashSet<MessageId>,
}

/// The timeline as shared between the controller, the send coordinator,
/// and the live feed task. Critical sections are short (one insert or
/// scan), so a blocking mutex is the right tool.
pub type SharedTimeline = Arc<parking_lot::Mutex<Timeline>>;

/// Creates an empty shared timeline.
#[must_use]
pub fn shared() -> SharedTimeline {
    Arc::new(parking_lot::Mutex::new(Timeline::new()))
}

impl Timeline {
    /// Creates an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a message, keeping order and identity uniqueness.
    ///
    /// - Unknown id: the entry is placed at its `(created_at, id)` position
    ///   and [`InsertOutcome::Appended`] is returned.
    /// - Known id, existing entry optimistic, incoming confirmed: the entry
    ///   is upgraded in place — content refreshed from the authoritative
    ///   message, position unchanged so nothing visually reorders — and
    ///   [`InsertOutcome::Confirmed`] is returned.
    /// - Anything else: [`InsertOutcome::Duplicate`], no change.
    pub fn insert(&mut self, message: Message, provenance: Provenance) -> InsertOutcome {
        if self.ids.contains(&message.id) {
            let Some(existing) = self.entries.iter_mut().find(|e| e.message.id == message.id)
            else {
                return InsertOutcome::Duplicate;
            };
            if existing.provenance == Provenance::Optimistic && provenance == Provenance::Confirmed
            {
                // Keep the slot, take the authoritative content.
                let position_key = existing.message.created_at;
                existing.message = message;
                existing.message.created_at = position_key;
                existing.provenance = Provenance::Confirmed;
                return InsertOutcome::Confirmed;
            }
            return InsertOutcome::Duplicate;
        }

        let key = (message.created_at, message.id);
        let at = self
            .entries
            .partition_point(|e| (e.message.created_at, e.message.id) <= key);
        self.ids.insert(message.id);
        self.entries.insert(at, Entry {
            message,
            provenance,
        });
        InsertOutcome::Appended
    }

    /// Removes an entry by id, for send rollback. Returns whether an entry
    /// was actually removed.
    pub fn remove(&mut self, id: &MessageId) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.entries.retain(|e| e.message.id != *id);
        true
    }

    /// Replaces the whole timeline with a fetched page, all confirmed.
    ///
    /// Optimistic entries already present (a send still in flight while the
    /// page loaded) are kept and re-merged through the insert discipline.
    pub fn reset_to(&mut self, messages: Vec<Message>) {
        let optimistic: Vec<Message> = self
            .entries
            .iter()
            .filter(|e| e.provenance == Provenance::Optimistic)
            .map(|e| e.message.clone())
            .collect();
        self.entries.clear();
        self.ids.clear();
        for message in messages {
            self.insert(message, Provenance::Confirmed);
        }
        for message in optimistic {
            self.insert(message, Provenance::Optimistic);
        }
    }

    /// Clears the timeline, including optimistic entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    /// Entries in display order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Whether the given id is present.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the timeline is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
