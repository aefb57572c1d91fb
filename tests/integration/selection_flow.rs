//! Integration tests for the conversation state machine.
//!
//! Verifies:
//! 1. Initialization: auth check, thread list, selection reconciliation
//!    (URL parameter wins, otherwise auto-select exactly once).
//! 2. Unauthenticated sessions end in a login redirect.
//! 3. Zero threads is a valid resting state; a failed thread list is
//!    retryable.
//! 4. Selection: idempotent reselect, URL updated without navigation,
//!    stale fetch results discarded, fetch failure isolated.

use std::sync::Arc;

use chrono::{Duration, Utc};
use leaselink::config::ClientConfig;
use leaselink::conversation::{ClientEvent, ConversationController, Phase, QueryUrlSync};
use leaselink_backend::{Backend, TestSession};
use leaselink_proto::ids::{MessageId, PrincipalId, ThreadId};
use leaselink_proto::message::Message;
use leaselink_proto::thread::{Profile, Thread};
use tokio::sync::mpsc;
use url::Url;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const GUEST: &str = "guest";

type Controller = ConversationController<Backend, Backend, TestSession, QueryUrlSync>;

fn controller_at(
    backend: &Backend,
    session: TestSession,
    url: &str,
) -> (Controller, mpsc::Receiver<ClientEvent>) {
    let (event_tx, event_rx) = mpsc::channel(64);
    let sync = QueryUrlSync::new(
        Url::parse(url).unwrap(),
        Url::parse("https://app.example/login").unwrap(),
    );
    let controller = ConversationController::new(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        Arc::new(session),
        sync,
        PrincipalId::new(GUEST),
        "Guest",
        &ClientConfig::default(),
        event_tx,
    );
    (controller, event_rx)
}

fn seed_thread(backend: &Backend, id: &str, host: &str, age_minutes: i64) {
    backend.seed_thread(Thread {
        id: ThreadId::new(id),
        host: PrincipalId::new(host),
        guest: PrincipalId::new(GUEST),
        listing: None,
        last_modified: Utc::now() - Duration::minutes(age_minutes),
        last_message_preview: None,
    });
}

fn seed_message(backend: &Backend, thread: &str, sender: &str, body: &str, age_minutes: i64) {
    backend.seed_message(Message {
        id: MessageId::new(),
        thread_id: ThreadId::new(thread),
        sender: PrincipalId::new(sender),
        body: body.to_string(),
        created_at: Utc::now() - Duration::minutes(age_minutes),
        call_to_action: None,
        warning: None,
    });
}

/// Backend with t1 (newer, host-1) and t2 (older, host-2), one message each.
fn seeded_backend() -> Backend {
    let backend = Backend::new();
    backend.seed_profile(Profile {
        id: PrincipalId::new("host-1"),
        display_name: "Marta".into(),
        avatar_url: None,
    });
    backend.seed_profile(Profile {
        id: PrincipalId::new("host-2"),
        display_name: "Oren".into(),
        avatar_url: None,
    });
    seed_thread(&backend, "t1", "host-1", 5);
    seed_thread(&backend, "t2", "host-2", 60);
    seed_message(&backend, "t1", "host-1", "welcome to t1", 10);
    seed_message(&backend, "t2", "host-2", "welcome to t2", 90);
    backend
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initialize_auto_selects_the_first_thread() {
    let backend = seeded_backend();
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");

    controller.initialize().await;
    assert_eq!(controller.phase(), &Phase::Loading(ThreadId::new("t1")));
    assert!(controller.process_next().await);

    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t1")));
    assert_eq!(controller.threads().len(), 2);
    assert_eq!(
        controller.url().url().query_pairs().find(|(k, _)| k == "thread"),
        Some(("thread".into(), "t1".into()))
    );
    let timeline = controller.timeline();
    let tl = timeline.lock();
    assert_eq!(tl.len(), 1);
    assert_eq!(tl.entries()[0].message.body, "welcome to t1");
    drop(tl);
    assert_eq!(
        controller.thread_info().map(|i| i.counterpart_name.as_str()),
        Some("Marta")
    );
}

#[tokio::test]
async fn url_parameter_wins_over_auto_select() {
    let backend = seeded_backend();
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) =
        controller_at(&backend, session, "https://app.example/inbox?thread=t2");

    controller.initialize().await;
    controller.process_next().await;

    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t2")));
    let timeline = controller.timeline();
    assert_eq!(timeline.lock().entries()[0].message.body, "welcome to t2");
}

#[tokio::test]
async fn unknown_url_parameter_falls_back_to_auto_select() {
    let backend = seeded_backend();
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) =
        controller_at(&backend, session, "https://app.example/inbox?thread=t404");

    controller.initialize().await;
    controller.process_next().await;
    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t1")));
}

#[tokio::test]
async fn unauthenticated_session_redirects_to_login() {
    let backend = seeded_backend();
    let session = TestSession::logged_out(&backend, PrincipalId::new(GUEST));
    session.disable_refresh();
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");

    controller.initialize().await;
    assert_eq!(controller.phase(), &Phase::Redirecting);
    assert!(controller.url().redirected());
    assert_eq!(controller.url().url().path(), "/login");
}

#[tokio::test]
async fn logged_out_but_refreshable_session_proceeds() {
    let backend = seeded_backend();
    let session = TestSession::logged_out(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");

    controller.initialize().await;
    controller.process_next().await;
    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t1")));
}

#[tokio::test]
async fn empty_inbox_rests_at_threads_loaded() {
    let backend = Backend::new();
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");

    controller.initialize().await;
    assert_eq!(controller.phase(), &Phase::ThreadsLoaded);
    assert!(controller.threads().is_empty());
    assert_eq!(controller.selected_thread(), None);
}

#[tokio::test]
async fn failed_thread_list_is_retryable() {
    let backend = seeded_backend();
    backend.set_threads_unavailable(true);
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");

    controller.initialize().await;
    assert_eq!(controller.phase(), &Phase::Failed);

    backend.set_threads_unavailable(false);
    controller.retry().await;
    controller.process_next().await;
    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t1")));
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reselecting_the_current_thread_is_a_no_op() {
    let backend = seeded_backend();
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");
    controller.initialize().await;
    controller.process_next().await;

    controller.select_thread(ThreadId::new("t1"));
    // Still ready — no new Loading pass, no cleared timeline.
    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t1")));
    assert_eq!(controller.timeline().lock().len(), 1);
}

#[tokio::test]
async fn switching_threads_clears_and_reloads() {
    let backend = seeded_backend();
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");
    controller.initialize().await;
    controller.process_next().await;

    controller.select_thread(ThreadId::new("t2"));
    // Cleared synchronously, before the fetch resolves.
    assert_eq!(controller.timeline().lock().len(), 0);
    assert_eq!(controller.thread_info(), None);
    assert_eq!(controller.phase(), &Phase::Loading(ThreadId::new("t2")));

    controller.process_next().await;
    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t2")));
    let timeline = controller.timeline();
    assert_eq!(timeline.lock().entries()[0].message.body, "welcome to t2");
    assert_eq!(
        controller.url().url().query_pairs().find(|(k, _)| k == "thread"),
        Some(("thread".into(), "t2".into()))
    );
}

#[tokio::test]
async fn stale_fetch_results_are_discarded() {
    let backend = seeded_backend();
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");
    controller.initialize().await;
    controller.process_next().await;

    // Two rapid switches: the t2 fetch resolves after the user has
    // already moved on to t1 again.
    controller.select_thread(ThreadId::new("t2"));
    controller.select_thread(ThreadId::new("t1"));

    // Apply both outcomes, in spawn order (t2 first, then t1).
    controller.process_next().await;
    controller.process_next().await;

    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t1")));
    let timeline = controller.timeline();
    let tl = timeline.lock();
    assert_eq!(tl.len(), 1);
    // Only t1 content survived; the stale t2 page never applied.
    assert_eq!(tl.entries()[0].message.body, "welcome to t1");
    drop(tl);
    assert_eq!(
        controller.thread_info().map(|i| i.counterpart_name.as_str()),
        Some("Marta")
    );
}

#[tokio::test]
async fn message_fetch_failure_keeps_the_thread_list_usable() {
    let backend = seeded_backend();
    backend.set_messages_unavailable(true);
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    let (mut controller, _events) = controller_at(&backend, session, "https://app.example/inbox");

    controller.initialize().await;
    controller.process_next().await;

    // The conversation is degraded but the surface did not fail.
    assert_eq!(controller.phase(), &Phase::Ready(ThreadId::new("t1")));
    assert_eq!(controller.threads().len(), 2);
    assert!(controller.timeline().lock().is_empty());
    assert_eq!(controller.thread_info(), None);
}
