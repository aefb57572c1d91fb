//! In-memory tables, insert feed, and presence rooms.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use leaselink::auth::SessionToken;
use leaselink::backend::{
    ApiError, ChannelError, FeedSubscription, LiveChannels, MarketplaceApi, PresenceSubscription,
};
use leaselink_proto::api::{MessagePage, SendReceipt, SendRequest, SendTarget};
use leaselink_proto::codec;
use leaselink_proto::ids::{ListingId, PrincipalId, ThreadId};
use leaselink_proto::message::Message;
use leaselink_proto::presence::PresenceState;
use leaselink_proto::thread::{ListingCard, Profile, Thread, ThreadInfo};
use tokio::sync::{broadcast, mpsc, watch};

/// Preview length stored on the thread row.
const PREVIEW_CHARS: usize = 140;

#[derive(Default)]
struct Tables {
    threads: Vec<Thread>,
    messages: Vec<Message>,
    profiles: HashMap<PrincipalId, Profile>,
    listings: HashMap<ListingId, ListingCard>,
    archived: HashSet<ThreadId>,
    tokens: HashMap<String, PrincipalId>,
}

/// Per-operation fault switches for exercising failure paths.
#[derive(Default)]
struct Faults {
    threads_unavailable: AtomicBool,
    messages_unavailable: AtomicBool,
    send_unavailable: AtomicBool,
    profiles_unavailable: AtomicBool,
    listings_unavailable: AtomicBool,
}

struct Room {
    roster_tx: Arc<watch::Sender<Vec<PresenceState>>>,
}

struct Inner {
    tables: parking_lot::Mutex<Tables>,
    feed_tx: parking_lot::Mutex<Option<broadcast::Sender<serde_json::Value>>>,
    rooms: parking_lot::Mutex<HashMap<ThreadId, Arc<Room>>>,
    faults: Faults,
    next_thread: AtomicU64,
    next_token: AtomicU64,
    profiles_calls: AtomicU64,
    listings_calls: AtomicU64,
    feed_buffer: usize,
}

/// The in-memory marketplace backend.
///
/// Cheap to clone; all clones share the same tables, feed, and rooms.
#[derive(Clone)]
pub struct Backend {
    inner: Arc<Inner>,
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    /// Creates an empty backend with the default feed buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_feed_buffer(256)
    }

    /// Creates an empty backend with a custom insert feed buffer.
    #[must_use]
    pub fn with_feed_buffer(feed_buffer: usize) -> Self {
        let (feed_tx, _) = broadcast::channel(feed_buffer);
        Self {
            inner: Arc::new(Inner {
                tables: parking_lot::Mutex::new(Tables::default()),
                feed_tx: parking_lot::Mutex::new(Some(feed_tx)),
                rooms: parking_lot::Mutex::new(HashMap::new()),
                faults: Faults::default(),
                next_thread: AtomicU64::new(1),
                next_token: AtomicU64::new(1),
                profiles_calls: AtomicU64::new(0),
                listings_calls: AtomicU64::new(0),
                feed_buffer,
            }),
        }
    }

    // -- Seeding --------------------------------------------------------

    /// Seeds a public profile.
    pub fn seed_profile(&self, profile: Profile) {
        self.inner
            .tables
            .lock()
            .profiles
            .insert(profile.id.clone(), profile);
    }

    /// Seeds a listing card.
    pub fn seed_listing(&self, card: ListingCard) {
        self.inner
            .tables
            .lock()
            .listings
            .insert(card.id.clone(), card);
    }

    /// Seeds a thread row verbatim.
    pub fn seed_thread(&self, thread: Thread) {
        self.inner.tables.lock().threads.push(thread);
    }

    /// Marks a thread archived.
    pub fn archive_thread(&self, thread: &ThreadId) {
        self.inner.tables.lock().archived.insert(thread.clone());
    }

    /// Stores a message and maintains the thread row, without touching the
    /// feed. For seeding history.
    pub fn seed_message(&self, message: Message) {
        let mut tables = self.inner.tables.lock();
        touch_thread(&mut tables, &message);
        tables.messages.push(message);
    }

    /// Stores a message as if another client had just written it: the
    /// thread row is maintained and the row goes out on the insert feed.
    pub fn inject_insert(&self, message: Message) {
        {
            let mut tables = self.inner.tables.lock();
            touch_thread(&mut tables, &message);
            tables.messages.push(message.clone());
        }
        self.publish(&message);
    }

    /// Pushes a raw row onto the insert feed, bypassing the tables.
    pub fn publish_row(&self, row: serde_json::Value) {
        if let Some(tx) = self.inner.feed_tx.lock().as_ref() {
            let _ = tx.send(row);
        }
    }

    // -- Fault injection ------------------------------------------------

    /// Makes `list_threads` fail with `Unavailable`.
    pub fn set_threads_unavailable(&self, on: bool) {
        self.inner
            .faults
            .threads_unavailable
            .store(on, Ordering::SeqCst);
    }

    /// Makes `list_messages` fail with `Unavailable`.
    pub fn set_messages_unavailable(&self, on: bool) {
        self.inner
            .faults
            .messages_unavailable
            .store(on, Ordering::SeqCst);
    }

    /// Makes `send_message` fail with `Unavailable`.
    pub fn set_send_unavailable(&self, on: bool) {
        self.inner
            .faults
            .send_unavailable
            .store(on, Ordering::SeqCst);
    }

    /// Makes `profiles_by_ids` fail with `Unavailable`.
    pub fn set_profiles_unavailable(&self, on: bool) {
        self.inner
            .faults
            .profiles_unavailable
            .store(on, Ordering::SeqCst);
    }

    /// Makes `listings_by_ids` fail with `Unavailable`.
    pub fn set_listings_unavailable(&self, on: bool) {
        self.inner
            .faults
            .listings_unavailable
            .store(on, Ordering::SeqCst);
    }

    /// Closes the insert feed: existing subscribers see `Closed`, new
    /// subscriptions are refused.
    pub fn drop_feed(&self) {
        *self.inner.feed_tx.lock() = None;
    }

    /// Restores the insert feed after [`Self::drop_feed`].
    pub fn restore_feed(&self) {
        let (feed_tx, _) = broadcast::channel(self.inner.feed_buffer);
        *self.inner.feed_tx.lock() = Some(feed_tx);
    }

    // -- Tokens ---------------------------------------------------------

    /// Mints and registers a bearer token for `principal`.
    #[must_use]
    pub fn register_token(&self, principal: &PrincipalId) -> String {
        let n = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let token = format!("tok-{n}");
        self.inner
            .tables
            .lock()
            .tokens
            .insert(token.clone(), principal.clone());
        token
    }

    /// Invalidates every outstanding token, as a server-side expiry would.
    pub fn revoke_all_tokens(&self) {
        self.inner.tables.lock().tokens.clear();
    }

    /// Number of `profiles_by_ids` calls so far. Lets tests assert that
    /// enrichment stays batched.
    #[must_use]
    pub fn profiles_call_count(&self) -> u64 {
        self.inner.profiles_calls.load(Ordering::SeqCst)
    }

    /// Number of `listings_by_ids` calls so far.
    #[must_use]
    pub fn listings_call_count(&self) -> u64 {
        self.inner.listings_calls.load(Ordering::SeqCst)
    }

    fn authenticate(&self, token: &SessionToken) -> Result<PrincipalId, ApiError> {
        self.inner
            .tables
            .lock()
            .tokens
            .get(token.as_str())
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }

    fn publish(&self, message: &Message) {
        let row = match codec::encode_row(message) {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode feed row");
                return;
            }
        };
        if let Some(tx) = self.inner.feed_tx.lock().as_ref() {
            let _ = tx.send(row);
        }
    }

    fn thread_info_for(tables: &Tables, thread: &Thread, caller: &PrincipalId) -> ThreadInfo {
        let counterpart = thread.counterpart(caller);
        ThreadInfo {
            counterpart_name: tables.profiles.get(counterpart).map_or_else(
                || counterpart.as_str().to_string(),
                |p| p.display_name.clone(),
            ),
            listing_title: thread
                .listing
                .as_ref()
                .and_then(|id| tables.listings.get(id))
                .map(|card| card.title.clone()),
            archived: tables.archived.contains(&thread.id),
        }
    }

    /// Resolves the thread for a send target, creating it on first
    /// contact. Returns the thread id and whether it was created.
    fn resolve_target(
        &self,
        tables: &mut Tables,
        caller: &PrincipalId,
        target: &SendTarget,
    ) -> Result<(ThreadId, bool), ApiError> {
        match target {
            SendTarget::Existing(id) => {
                let thread = tables
                    .threads
                    .iter()
                    .find(|t| t.id == *id)
                    .ok_or_else(|| ApiError::NotFound(format!("thread {id}")))?;
                if !thread.involves(caller) {
                    return Err(ApiError::Rejected("not a participant".into()));
                }
                Ok((id.clone(), false))
            }
            SendTarget::FirstContact { recipient, listing } => {
                if recipient == caller {
                    return Err(ApiError::Rejected("cannot message yourself".into()));
                }
                // One thread per (pair, listing).
                if let Some(existing) = tables.threads.iter().find(|t| {
                    t.involves(caller) && t.involves(recipient) && t.listing == *listing
                }) {
                    return Ok((existing.id.clone(), false));
                }
                let n = self.inner.next_thread.fetch_add(1, Ordering::SeqCst);
                let id = ThreadId::new(format!("t{n}"));
                tables.threads.push(Thread {
                    id: id.clone(),
                    host: recipient.clone(),
                    guest: caller.clone(),
                    listing: listing.clone(),
                    last_modified: Utc::now(),
                    last_message_preview: None,
                });
                Ok((id, true))
            }
        }
    }
}

/// Bumps `last_modified` and the preview on the message's thread row.
fn touch_thread(tables: &mut Tables, message: &Message) {
    if let Some(thread) = tables
        .threads
        .iter_mut()
        .find(|t| t.id == message.thread_id)
    {
        thread.last_modified = message.created_at;
        thread.last_message_preview = Some(message.body.chars().take(PREVIEW_CHARS).collect());
    }
}

impl MarketplaceApi for Backend {
    async fn list_threads(&self, token: &SessionToken) -> Result<Vec<Thread>, ApiError> {
        if self.inner.faults.threads_unavailable.load(Ordering::SeqCst) {
            return Err(ApiError::Unavailable("injected".into()));
        }
        let caller = self.authenticate(token)?;
        let tables = self.inner.tables.lock();
        Ok(tables
            .threads
            .iter()
            .filter(|t| t.involves(&caller))
            .cloned()
            .collect())
    }

    async fn list_messages(
        &self,
        token: &SessionToken,
        thread: &ThreadId,
    ) -> Result<MessagePage, ApiError> {
        if self
            .inner
            .faults
            .messages_unavailable
            .load(Ordering::SeqCst)
        {
            return Err(ApiError::Unavailable("injected".into()));
        }
        let caller = self.authenticate(token)?;
        let tables = self.inner.tables.lock();
        let row = tables
            .threads
            .iter()
            .find(|t| t.id == *thread)
            .ok_or_else(|| ApiError::NotFound(format!("thread {thread}")))?;
        if !row.involves(&caller) {
            return Err(ApiError::Rejected("not a participant".into()));
        }
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.thread_id == *thread)
            .cloned()
            .collect();
        messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(MessagePage {
            thread_info: Self::thread_info_for(&tables, row, &caller),
            messages,
        })
    }

    async fn send_message(
        &self,
        token: &SessionToken,
        request: SendRequest,
    ) -> Result<SendReceipt, ApiError> {
        if self.inner.faults.send_unavailable.load(Ordering::SeqCst) {
            return Err(ApiError::Unavailable("injected".into()));
        }
        let caller = self.authenticate(token)?;

        let (message, created_thread) = {
            let mut tables = self.inner.tables.lock();

            // The id is an idempotency key: a resend returns the stored
            // message without a second insert or feed row.
            if let Some(existing) = tables.messages.iter().find(|m| m.id == request.id) {
                return Ok(SendReceipt {
                    message: existing.clone(),
                    created_thread: None,
                });
            }

            let (thread_id, created) =
                self.resolve_target(&mut tables, &caller, &request.target)?;
            let message = Message {
                id: request.id,
                thread_id,
                sender: caller,
                body: request.body,
                created_at: Utc::now(),
                call_to_action: None,
                warning: None,
            };
            touch_thread(&mut tables, &message);
            tables.messages.push(message.clone());
            (message, created)
        };

        self.publish(&message);
        Ok(SendReceipt {
            created_thread: created_thread.then(|| message.thread_id.clone()),
            message,
        })
    }

    async fn profiles_by_ids(
        &self,
        token: &SessionToken,
        ids: &[PrincipalId],
    ) -> Result<Vec<Profile>, ApiError> {
        self.inner.profiles_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .inner
            .faults
            .profiles_unavailable
            .load(Ordering::SeqCst)
        {
            return Err(ApiError::Unavailable("injected".into()));
        }
        self.authenticate(token)?;
        let tables = self.inner.tables.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.profiles.get(id).cloned())
            .collect())
    }

    async fn listings_by_ids(
        &self,
        token: &SessionToken,
        ids: &[ListingId],
    ) -> Result<Vec<ListingCard>, ApiError> {
        self.inner.listings_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .inner
            .faults
            .listings_unavailable
            .load(Ordering::SeqCst)
        {
            return Err(ApiError::Unavailable("injected".into()));
        }
        self.authenticate(token)?;
        let tables = self.inner.tables.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.listings.get(id).cloned())
            .collect())
    }
}

impl LiveChannels for Backend {
    async fn subscribe_inserts(&self) -> Result<FeedSubscription, ChannelError> {
        self.inner
            .feed_tx
            .lock()
            .as_ref()
            .map(|tx| FeedSubscription::new(tx.subscribe()))
            .ok_or(ChannelError::Closed)
    }

    async fn join_presence(
        &self,
        thread: &ThreadId,
        me: PresenceState,
    ) -> Result<PresenceSubscription, ChannelError> {
        let room = {
            let mut rooms = self.inner.rooms.lock();
            Arc::clone(rooms.entry(thread.clone()).or_insert_with(|| {
                let (roster_tx, _) = watch::channel(Vec::new());
                Arc::new(Room {
                    roster_tx: Arc::new(roster_tx),
                })
            }))
        };

        let principal = me.principal.clone();
        room.roster_tx.send_modify(|roster| {
            roster.retain(|p| p.principal != principal);
            roster.push(me);
        });

        let (publisher, mut updates) = mpsc::channel::<bool>(16);
        let roster = room.roster_tx.subscribe();
        let roster_tx = Arc::clone(&room.roster_tx);
        tokio::spawn(async move {
            // Member loop: apply typing updates until the subscription is
            // dropped, then clear the tracked state.
            while let Some(typing) = updates.recv().await {
                roster_tx.send_modify(|roster| {
                    if let Some(entry) = roster.iter_mut().find(|p| p.principal == principal) {
                        entry.typing = typing;
                        entry.updated_at = Utc::now();
                    }
                });
            }
            roster_tx.send_modify(|roster| {
                roster.retain(|p| p.principal != principal);
            });
        });

        Ok(PresenceSubscription::new(roster, publisher))
    }
}
