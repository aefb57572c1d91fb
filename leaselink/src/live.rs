//! Live event subscriber for the selected thread.
//!
//! Spawns two tasks per selection: a feed task that filters the global
//! insert feed down to the selected thread and merges rows into the shared
//! timeline, and a presence task that reduces the room roster to a single
//! "who is typing" answer. Join readiness is handed off through a one-shot
//! with a bounded timeout. The returned [`LiveHandle`] owns both tasks and
//! the presence membership; dropping it tears everything down so nothing
//! leaks across thread switches.

use std::time::Duration;

use chrono::Utc;
use leaselink_proto::codec;
use leaselink_proto::ids::{PrincipalId, ThreadId};
use leaselink_proto::presence::PresenceState;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backend::{ChannelError, LiveChannels, PresenceSubscription};
use crate::conversation::{ClientEvent, TypingPeer};
use crate::timeline::{InsertOutcome, Provenance, SharedTimeline};

/// Tuning for the live subscriber.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// How long to wait for presence join readiness.
    pub join_timeout: Duration,
    /// How long a peer's typing flag stays meaningful without a refresh.
    pub typing_idle_window: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
            typing_idle_window: Duration::from_millis(2000),
        }
    }
}

/// Errors from establishing the live subscriptions.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// The feed or presence subscription could not be established.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The presence room did not acknowledge the join in time.
    #[error("presence join timed out")]
    JoinTimeout,
}

/// Owner of the two live tasks and the presence membership for one
/// selected thread.
#[derive(Debug)]
pub struct LiveHandle {
    thread: ThreadId,
    publisher: mpsc::Sender<bool>,
    feed_task: JoinHandle<()>,
    presence_task: JoinHandle<()>,
    // Held so the room membership outlives the tasks; dropping it leaves
    // the room and clears the tracked state.
    _presence: PresenceSubscription,
}

impl LiveHandle {
    /// The thread this handle is live for.
    #[must_use]
    pub fn thread(&self) -> &ThreadId {
        &self.thread
    }

    /// A handle that can publish the typing flag independently of this
    /// handle's lifetime within the current selection. Publishing is best
    /// effort: a closed room drops the flag.
    #[must_use]
    pub fn typing_publisher(&self) -> mpsc::Sender<bool> {
        self.publisher.clone()
    }

    /// Tears down both tasks and leaves the presence room.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.feed_task.abort();
        self.presence_task.abort();
    }
}

/// Factory for live subscriptions.
pub struct LiveFeed;

impl LiveFeed {
    /// Establishes the feed and presence subscriptions for `thread` and
    /// spawns the two processing tasks.
    ///
    /// Resolves once the presence room has acknowledged the join (the
    /// roster reflects `me`), or fails with [`LiveError::JoinTimeout`]
    /// after `config.join_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError`] when either subscription cannot be
    /// established or the join is not acknowledged in time.
    pub async fn spawn<C: LiveChannels>(
        channels: &C,
        thread: ThreadId,
        me: PresenceState,
        timeline: SharedTimeline,
        events: mpsc::Sender<ClientEvent>,
        config: &LiveConfig,
    ) -> Result<LiveHandle, LiveError> {
        let feed = channels.subscribe_inserts().await?;
        let presence = channels.join_presence(&thread, me.clone()).await?;
        let publisher = presence.publisher();
        let roster = presence.roster.clone();

        let (ready_tx, ready_rx) = oneshot::channel();

        let feed_task = tokio::spawn(run_feed(
            feed.rows,
            thread.clone(),
            me.principal.clone(),
            timeline,
            events.clone(),
        ));
        let presence_task = tokio::spawn(run_presence(
            roster,
            me.principal.clone(),
            config.typing_idle_window,
            events,
            ready_tx,
        ));

        let handle = LiveHandle {
            thread,
            publisher,
            feed_task,
            presence_task,
            _presence: presence,
        };

        match tokio::time::timeout(config.join_timeout, ready_rx).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(thread = %handle.thread, "presence join not acknowledged");
                drop(handle);
                Err(LiveError::JoinTimeout)
            }
        }
    }
}

/// Feed loop: decode, filter to the selected thread, merge, notify.
async fn run_feed(
    mut rows: broadcast::Receiver<serde_json::Value>,
    thread: ThreadId,
    me: PrincipalId,
    timeline: SharedTimeline,
    events: mpsc::Sender<ClientEvent>,
) {
    loop {
        match rows.recv().await {
            Ok(row) => {
                let message = match codec::decode_row(&row) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed feed row");
                        continue;
                    }
                };
                // The feed carries every insert system-wide.
                if message.thread_id != thread {
                    continue;
                }
                let own = message.authored_by(&me);
                let outcome = timeline
                    .lock()
                    .insert(message.clone(), Provenance::Confirmed);
                if outcome == InsertOutcome::Duplicate {
                    continue;
                }
                let _ = events.try_send(ClientEvent::MessageArrived { message, own });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Missed rows are recovered by the next explicit fetch.
                tracing::warn!(skipped, "insert feed lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!(thread = %thread, "insert feed closed");
                break;
            }
        }
    }
}

/// Presence loop: reduce the roster to "first other participant typing".
async fn run_presence(
    mut roster: watch::Receiver<Vec<PresenceState>>,
    me: PrincipalId,
    idle_window: Duration,
    events: mpsc::Sender<ClientEvent>,
    ready: oneshot::Sender<()>,
) {
    let idle_window = chrono::Duration::milliseconds(
        i64::try_from(idle_window.as_millis()).unwrap_or(2000),
    );
    let mut ready = Some(ready);
    let mut current: Option<TypingPeer> = None;

    loop {
        let snapshot = roster.borrow_and_update().clone();

        if snapshot.iter().any(|p| p.principal == me)
            && let Some(tx) = ready.take()
        {
            let _ = tx.send(());
        }

        let active = snapshot
            .iter()
            .find(|p| p.principal != me && p.typing_within(idle_window, Utc::now()));
        let expires_at = active.map(|p| p.updated_at + idle_window);
        let typing = active.map(|p| TypingPeer {
            principal: p.principal.clone(),
            display_name: p.display_name.clone(),
        });
        if typing != current {
            current = typing.clone();
            let _ = events.try_send(ClientEvent::TypingChanged(typing));
        }

        // A shown indicator must clear even if the peer never refreshes
        // its record: wake at the record's staleness deadline.
        let changed = match expires_at {
            Some(expiry) => {
                let wait = (expiry - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    changed = roster.changed() => changed,
                    () = tokio::time::sleep(wait) => continue,
                }
            }
            None => roster.changed().await,
        };
        if changed.is_err() {
            tracing::debug!("presence room closed");
            break;
        }
    }
}
