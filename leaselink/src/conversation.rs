//! Conversation state machine and the URL sync seam.
//!
//! The [`ConversationController`] is the single writer for all messaging
//! state: which phase the inbox is in, which thread is selected, the shared
//! timeline, the live subscriptions, and the local typing flag. The UI
//! consumes state through accessors plus a best-effort [`ClientEvent`]
//! channel and never mutates anything directly.
//!
//! Selection is raced against the user: every selection bumps a generation
//! counter, fetches resolve tagged with the generation they were issued
//! under, and a result that comes back after the user has moved on is
//! discarded instead of applied.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use leaselink_proto::api::{MessagePage, SendReceipt};
use leaselink_proto::ids::{PrincipalId, ThreadId};
use leaselink_proto::message::Message;
use leaselink_proto::presence::PresenceState;
use leaselink_proto::thread::ThreadInfo;
use tokio::sync::mpsc;
use url::Url;

use crate::auth::{AuthError, AuthSession};
use crate::backend::{LiveChannels, MarketplaceApi};
use crate::config::ClientConfig;
use crate::live::{LiveConfig, LiveFeed, LiveHandle};
use crate::messages::{FetchError, MessageRepository};
use crate::send::{SendCoordinator, SendError, TypingSignal};
use crate::threads::{ThreadRepository, ThreadSummary, ThreadsError};
use crate::timeline::{self, SharedTimeline};
use crate::typing::TypingTracker;

/// Where the conversation surface currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Checking the session and loading the thread list.
    Initializing,
    /// Unauthenticated; the login redirect has been issued and the core
    /// has halted.
    Redirecting,
    /// Thread list loaded, nothing selected. Zero threads is a valid
    /// resting state, not an error.
    ThreadsLoaded,
    /// A thread is selected and its messages are being fetched.
    Loading(ThreadId),
    /// A thread is selected, its page applied, live subscriptions up (or
    /// degraded to not-live after a channel failure).
    Ready(ThreadId),
    /// The thread list itself could not be loaded; [`ConversationController::retry`]
    /// re-runs initialization.
    Failed,
}

/// A peer currently typing in the selected thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingPeer {
    /// The typing participant.
    pub principal: PrincipalId,
    /// Their display name.
    pub display_name: String,
}

/// Best-effort notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The controller moved to a new phase.
    PhaseChanged(Phase),
    /// The thread list was (re)loaded.
    ThreadsUpdated,
    /// A message landed in the selected thread's timeline. `own` marks
    /// messages authored by the local participant.
    MessageArrived {
        /// The merged message.
        message: Message,
        /// Whether the local participant authored it.
        own: bool,
    },
    /// Who is typing in the selected thread changed.
    TypingChanged(Option<TypingPeer>),
}

/// Seam between the conversation core and the host page's URL.
///
/// Injected rather than reached for globally, so tests and non-browser
/// hosts can supply their own. `set_thread_param` records the selection
/// without navigating; `redirect_to_login` is a navigation and ends the
/// core's involvement.
pub trait UrlSync: Send {
    /// The `thread` query parameter, if present.
    fn thread_param(&self) -> Option<ThreadId>;

    /// Writes the `thread` query parameter in place.
    fn set_thread_param(&mut self, thread: &ThreadId);

    /// Navigates to the login page.
    fn redirect_to_login(&mut self);
}

/// [`UrlSync`] over an in-memory [`url::Url`].
#[derive(Debug, Clone)]
pub struct QueryUrlSync {
    url: Url,
    login_url: Url,
    redirected: bool,
}

impl QueryUrlSync {
    /// Creates a sync seam over `url`, redirecting to `login_url` when
    /// asked.
    #[must_use]
    pub const fn new(url: Url, login_url: Url) -> Self {
        Self {
            url,
            login_url,
            redirected: false,
        }
    }

    /// Creates a sync seam over the host page's URL, redirecting to the
    /// configured login page.
    ///
    /// # Errors
    ///
    /// Returns the parse error when the configured login URL is not a
    /// valid URL.
    pub fn from_config(url: Url, config: &ClientConfig) -> Result<Self, url::ParseError> {
        Ok(Self::new(url, Url::parse(&config.login_url)?))
    }

    /// The current URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Whether a login redirect has been issued.
    #[must_use]
    pub const fn redirected(&self) -> bool {
        self.redirected
    }
}

impl UrlSync for QueryUrlSync {
    fn thread_param(&self) -> Option<ThreadId> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "thread")
            .map(|(_, value)| ThreadId::new(value.into_owned()))
    }

    fn set_thread_param(&mut self, thread: &ThreadId) {
        let others: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(key, _)| key != "thread")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let mut pairs = self.url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &others {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("thread", thread.as_str());
        drop(pairs);
    }

    fn redirect_to_login(&mut self) {
        self.url = self.login_url.clone();
        self.redirected = true;
    }
}

/// Result of a spawned message fetch, tagged with the selection
/// generation it was issued under.
#[derive(Debug)]
struct FetchOutcome {
    generation: u64,
    thread: ThreadId,
    result: Result<MessagePage, FetchError>,
}

/// Typing seam handed to the send coordinator: clearing at send time
/// stops the tracker and broadcasts the stop to the current room.
#[derive(Debug, Clone)]
struct ControllerTyping {
    tracker: Arc<parking_lot::Mutex<TypingTracker>>,
    publisher: Arc<parking_lot::Mutex<Option<mpsc::Sender<bool>>>>,
}

impl TypingSignal for ControllerTyping {
    fn clear(&self) {
        let was_typing = self.tracker.lock().clear();
        if was_typing
            && let Some(tx) = self.publisher.lock().as_ref()
        {
            let _ = tx.try_send(false);
        }
    }
}

/// Single-writer controller for the conversation surface.
pub struct ConversationController<A, C, S, U> {
    api: Arc<A>,
    channels: Arc<C>,
    session: Arc<S>,
    url: U,
    me: PrincipalId,
    display_name: String,
    live_config: LiveConfig,

    phase: Phase,
    threads: Vec<ThreadSummary>,
    thread_info: Option<ThreadInfo>,
    timeline: SharedTimeline,
    live: Option<LiveHandle>,
    generation: u64,
    auto_selected: bool,

    thread_repo: ThreadRepository<A, S>,
    sender: SendCoordinator<A, S, ControllerTyping>,
    typing: Arc<parking_lot::Mutex<TypingTracker>>,
    typing_publisher: Arc<parking_lot::Mutex<Option<mpsc::Sender<bool>>>>,

    event_tx: mpsc::Sender<ClientEvent>,
    outcome_tx: mpsc::Sender<FetchOutcome>,
    outcome_rx: mpsc::Receiver<FetchOutcome>,
}

impl<A, C, S, U> ConversationController<A, C, S, U>
where
    A: MarketplaceApi + 'static,
    C: LiveChannels,
    S: AuthSession + 'static,
    U: UrlSync,
{
    /// Creates a controller for `me` over the given backend and URL seam.
    pub fn new(
        api: Arc<A>,
        channels: Arc<C>,
        session: Arc<S>,
        url: U,
        me: PrincipalId,
        display_name: impl Into<String>,
        config: &ClientConfig,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Self {
        let timeline = timeline::shared();
        let typing = Arc::new(parking_lot::Mutex::new(TypingTracker::new(
            config.typing_idle_window,
        )));
        let typing_publisher = Arc::new(parking_lot::Mutex::new(None));
        let signal = ControllerTyping {
            tracker: Arc::clone(&typing),
            publisher: Arc::clone(&typing_publisher),
        };
        let (outcome_tx, outcome_rx) = mpsc::channel(config.event_buffer);

        Self {
            thread_repo: ThreadRepository::new(Arc::clone(&api), Arc::clone(&session), me.clone()),
            sender: SendCoordinator::new(
                Arc::clone(&api),
                Arc::clone(&session),
                me.clone(),
                Arc::clone(&timeline),
                signal,
            ),
            api,
            channels,
            session,
            url,
            me,
            display_name: display_name.into(),
            live_config: LiveConfig {
                join_timeout: config.join_timeout,
                typing_idle_window: config.typing_idle_window,
            },
            phase: Phase::Initializing,
            threads: Vec::new(),
            thread_info: None,
            timeline,
            live: None,
            generation: 0,
            auto_selected: false,
            typing,
            typing_publisher,
            event_tx,
            outcome_tx,
            outcome_rx,
        }
    }

    /// Runs the startup sequence: session check, thread list, selection
    /// reconciliation.
    ///
    /// Unauthenticated ends in [`Phase::Redirecting`] with the login
    /// redirect issued. A failed thread list ends in [`Phase::Failed`].
    /// Otherwise the URL's `thread` parameter wins if it names a known
    /// thread; failing that, the first thread is auto-selected — at most
    /// once per controller lifetime, so a later list refresh never yanks
    /// the user's selection.
    pub async fn initialize(&mut self) {
        self.set_phase(Phase::Initializing);

        let authenticated = match self.session.token().await {
            Ok(_) => true,
            Err(AuthError::NotAuthenticated) => self.session.refresh().await.is_ok(),
            Err(_) => false,
        };
        if !authenticated {
            tracing::info!("no usable session, redirecting to login");
            self.url.redirect_to_login();
            self.set_phase(Phase::Redirecting);
            return;
        }

        match self.thread_repo.list().await {
            Ok(threads) => {
                self.threads = threads;
                let _ = self.event_tx.try_send(ClientEvent::ThreadsUpdated);
                self.set_phase(Phase::ThreadsLoaded);

                let from_url = self
                    .url
                    .thread_param()
                    .filter(|id| self.threads.iter().any(|t| t.thread.id == *id));
                if let Some(id) = from_url {
                    self.auto_selected = true;
                    self.select_thread(id);
                } else if !self.auto_selected
                    && let Some(first) = self.threads.first()
                {
                    self.auto_selected = true;
                    let id = first.thread.id.clone();
                    self.select_thread(id);
                }
            }
            Err(ThreadsError::Auth(e)) => {
                tracing::info!(error = %e, "session unusable, redirecting to login");
                self.url.redirect_to_login();
                self.set_phase(Phase::Redirecting);
            }
            Err(e) => {
                tracing::error!(error = %e, "thread list failed");
                self.set_phase(Phase::Failed);
            }
        }
    }

    /// Re-runs initialization after a [`Phase::Failed`]. A no-op in any
    /// other phase.
    pub async fn retry(&mut self) {
        if self.phase == Phase::Failed {
            self.initialize().await;
        }
    }

    /// Selects a thread: clears the previous conversation synchronously,
    /// records the selection in the URL, and spawns the message fetch.
    ///
    /// Re-selecting the current thread is a no-op. The spawned fetch
    /// resolves through [`Self::process_next`], where a result from a
    /// superseded selection is discarded.
    pub fn select_thread(&mut self, id: ThreadId) {
        if self.selected_thread() == Some(&id) {
            return;
        }
        self.generation += 1;
        let generation = self.generation;

        self.timeline.lock().clear();
        self.thread_info = None;
        if let Some(live) = self.live.take() {
            live.shutdown();
        }
        *self.typing_publisher.lock() = None;
        self.typing.lock().clear();
        let _ = self.event_tx.try_send(ClientEvent::TypingChanged(None));

        self.url.set_thread_param(&id);
        self.set_phase(Phase::Loading(id.clone()));

        let repo = MessageRepository::new(Arc::clone(&self.api), Arc::clone(&self.session));
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = repo.fetch(&id).await;
            let _ = outcome_tx
                .send(FetchOutcome {
                    generation,
                    thread: id,
                    result,
                })
                .await;
        });
    }

    /// Waits for the next fetch outcome and applies it.
    ///
    /// Returns `false` when the controller is shutting down and no more
    /// outcomes can arrive. Call once per issued selection (the UI's event
    /// loop does this continuously).
    pub async fn process_next(&mut self) -> bool {
        let Some(outcome) = self.outcome_rx.recv().await else {
            return false;
        };
        self.apply_fetch(outcome).await;
        true
    }

    async fn apply_fetch(&mut self, outcome: FetchOutcome) {
        if outcome.generation != self.generation {
            tracing::debug!(thread = %outcome.thread, "discarding stale fetch result");
            return;
        }

        match outcome.result {
            Ok(page) => {
                self.timeline.lock().reset_to(page.messages);
                self.thread_info = Some(page.thread_info);
            }
            Err(e) => {
                // The thread list stays usable; the conversation shows
                // empty until a reselect or live delivery.
                tracing::warn!(thread = %outcome.thread, error = %e, "message fetch failed");
            }
        }

        // Live subscriptions are attempted even after a failed fetch.
        let me = PresenceState {
            principal: self.me.clone(),
            display_name: self.display_name.clone(),
            typing: false,
            updated_at: Utc::now(),
        };
        match LiveFeed::spawn(
            self.channels.as_ref(),
            outcome.thread.clone(),
            me,
            Arc::clone(&self.timeline),
            self.event_tx.clone(),
            &self.live_config,
        )
        .await
        {
            Ok(handle) => {
                *self.typing_publisher.lock() = Some(handle.typing_publisher());
                self.live = Some(handle);
            }
            Err(e) => {
                tracing::warn!(thread = %outcome.thread, error = %e, "live subscription failed, conversation is not live");
            }
        }

        self.set_phase(Phase::Ready(outcome.thread));
    }

    /// Sends into the selected thread. Orthogonal to the phase machine:
    /// the phase never changes on account of a send.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NoSelection`] when nothing is selected, or any
    /// send pipeline error; failures leave the draft with the caller.
    pub async fn send(&self, body: &str) -> Result<SendReceipt, SendError> {
        let thread = self
            .selected_thread()
            .ok_or(SendError::NoSelection)?
            .clone();
        self.sender.send(&thread, body).await
    }

    /// Records a local keystroke, broadcasting a typing start when a new
    /// burst begins.
    pub fn note_keystroke(&self) {
        if self.typing.lock().note_keystroke(Instant::now()) {
            self.publish_typing(true);
        }
    }

    /// Advances the typing clock, broadcasting a stop when the idle
    /// window elapses. The host calls this on its frame tick.
    pub fn tick_typing(&self) {
        if self.typing.lock().tick(Instant::now()) {
            self.publish_typing(false);
        }
    }

    fn publish_typing(&self, flag: bool) {
        if let Some(tx) = self.typing_publisher.lock().as_ref() {
            let _ = tx.try_send(flag);
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// The enriched thread list, most recently active first.
    #[must_use]
    pub fn threads(&self) -> &[ThreadSummary] {
        &self.threads
    }

    /// Denormalized info for the selected thread, once fetched.
    #[must_use]
    pub const fn thread_info(&self) -> Option<&ThreadInfo> {
        self.thread_info.as_ref()
    }

    /// The shared timeline for the selected thread.
    #[must_use]
    pub fn timeline(&self) -> SharedTimeline {
        Arc::clone(&self.timeline)
    }

    /// The selected thread, if any.
    #[must_use]
    pub const fn selected_thread(&self) -> Option<&ThreadId> {
        match &self.phase {
            Phase::Loading(id) | Phase::Ready(id) => Some(id),
            _ => None,
        }
    }

    /// The URL seam, for hosts that render from it.
    #[must_use]
    pub const fn url(&self) -> &U {
        &self.url
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "phase change");
            self.phase = phase;
            let _ = self
                .event_tx
                .try_send(ClientEvent::PhaseChanged(self.phase.clone()));
        }
    }
}
