//! Integration tests for the enriched thread listing.
//!
//! Verifies:
//! 1. Threads come back most recently active first, enriched with
//!    counterpart names and listing titles.
//! 2. Enrichment is batched: one profile lookup and one listing lookup
//!    per page, however many threads there are.
//! 3. Failed or partial enrichment degrades to placeholders instead of
//!    failing the list.
//! 4. An expired token recovers through the refresh-once policy; only the
//!    thread list itself failing is an error.

use std::sync::Arc;

use chrono::{Duration, Utc};
use leaselink::threads::{ThreadRepository, ThreadsError, UNKNOWN_USER};
use leaselink_backend::{Backend, TestSession};
use leaselink_proto::ids::{ListingId, PrincipalId, ThreadId};
use leaselink_proto::thread::{ListingCard, Profile, Thread};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const GUEST: &str = "guest";

fn profile(id: &str, name: &str) -> Profile {
    Profile {
        id: PrincipalId::new(id),
        display_name: name.to_string(),
        avatar_url: None,
    }
}

fn thread(id: &str, host: &str, listing: Option<&str>, age_minutes: i64) -> Thread {
    Thread {
        id: ThreadId::new(id),
        host: PrincipalId::new(host),
        guest: PrincipalId::new(GUEST),
        listing: listing.map(ListingId::new),
        last_modified: Utc::now() - Duration::minutes(age_minutes),
        last_message_preview: None,
    }
}

/// Backend with two hosts, two listings, and two threads (t1 newer).
fn seeded_backend() -> Backend {
    let backend = Backend::new();
    backend.seed_profile(profile("host-1", "Marta"));
    backend.seed_profile(profile("host-2", "Oren"));
    backend.seed_listing(ListingCard {
        id: ListingId::new("l1"),
        title: "Canal-side loft".into(),
    });
    backend.seed_listing(ListingCard {
        id: ListingId::new("l2"),
        title: "Garden studio".into(),
    });
    backend.seed_thread(thread("t1", "host-1", Some("l1"), 5));
    backend.seed_thread(thread("t2", "host-2", Some("l2"), 60));
    backend
}

fn repository(backend: &Backend) -> ThreadRepository<Backend, TestSession> {
    let session = TestSession::logged_in(backend, PrincipalId::new(GUEST));
    ThreadRepository::new(
        Arc::new(backend.clone()),
        Arc::new(session),
        PrincipalId::new(GUEST),
    )
}

// ---------------------------------------------------------------------------
// Listing and enrichment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lists_newest_first_with_names_and_titles() {
    let backend = seeded_backend();
    let repo = repository(&backend);

    let summaries = repo.list().await.unwrap();
    assert_eq!(summaries.len(), 2);

    assert_eq!(summaries[0].thread.id, ThreadId::new("t1"));
    assert_eq!(summaries[0].counterpart_name, "Marta");
    assert_eq!(summaries[0].listing_title.as_deref(), Some("Canal-side loft"));

    assert_eq!(summaries[1].thread.id, ThreadId::new("t2"));
    assert_eq!(summaries[1].counterpart_name, "Oren");
    assert_eq!(summaries[1].listing_title.as_deref(), Some("Garden studio"));
}

#[tokio::test]
async fn enrichment_is_one_lookup_per_entity_type() {
    let backend = seeded_backend();
    // A third thread sharing host-1 must not add lookups either.
    backend.seed_thread(thread("t3", "host-1", Some("l2"), 120));
    let repo = repository(&backend);

    repo.list().await.unwrap();
    assert_eq!(backend.profiles_call_count(), 1);
    assert_eq!(backend.listings_call_count(), 1);
}

#[tokio::test]
async fn unknown_counterpart_gets_placeholder_name() {
    let backend = seeded_backend();
    backend.seed_thread(thread("t3", "deleted-host", None, 1));
    let repo = repository(&backend);

    let summaries = repo.list().await.unwrap();
    let degraded = summaries
        .iter()
        .find(|s| s.thread.id == ThreadId::new("t3"))
        .unwrap();
    assert_eq!(degraded.counterpart_name, UNKNOWN_USER);
    assert_eq!(degraded.listing_title, None);
    // The other rows are unaffected.
    assert!(summaries.iter().any(|s| s.counterpart_name == "Marta"));
}

#[tokio::test]
async fn failed_profile_lookup_degrades_every_name() {
    let backend = seeded_backend();
    backend.set_profiles_unavailable(true);
    let repo = repository(&backend);

    let summaries = repo.list().await.unwrap();
    assert!(summaries.iter().all(|s| s.counterpart_name == UNKNOWN_USER));
    // Listing enrichment still works.
    assert_eq!(summaries[0].listing_title.as_deref(), Some("Canal-side loft"));
}

#[tokio::test]
async fn failed_listing_lookup_omits_titles() {
    let backend = seeded_backend();
    backend.set_listings_unavailable(true);
    let repo = repository(&backend);

    let summaries = repo.list().await.unwrap();
    assert!(summaries.iter().all(|s| s.listing_title.is_none()));
    assert_eq!(summaries[0].counterpart_name, "Marta");
}

// ---------------------------------------------------------------------------
// Failure and auth paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn thread_list_failure_is_an_error() {
    let backend = seeded_backend();
    backend.set_threads_unavailable(true);
    let repo = repository(&backend);

    let result = repo.list().await;
    assert!(matches!(result, Err(ThreadsError::Api(_))));
}

#[tokio::test]
async fn expired_token_recovers_through_refresh() {
    let backend = seeded_backend();
    let repo = repository(&backend);
    backend.revoke_all_tokens();

    let summaries = repo.list().await.unwrap();
    assert_eq!(summaries.len(), 2);
}

#[tokio::test]
async fn unrefreshable_session_fails_hard() {
    let backend = seeded_backend();
    let session = TestSession::logged_in(&backend, PrincipalId::new(GUEST));
    session.disable_refresh();
    backend.revoke_all_tokens();
    let repo = ThreadRepository::new(
        Arc::new(backend.clone()),
        Arc::new(session),
        PrincipalId::new(GUEST),
    );

    let result = repo.list().await;
    assert!(matches!(result, Err(ThreadsError::Auth(_))));
}
