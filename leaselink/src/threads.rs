//! Thread repository: the enriched inbox listing.
//!
//! Fetches every thread the caller participates in, newest activity first,
//! and enriches each row with the counterpart's profile and the listing
//! title. Enrichment is batched — one profile lookup and one listing
//! lookup for the whole page — and degrades to placeholder text when a
//! lookup fails or comes back partial. Only the thread list itself failing
//! is an error.

use std::collections::HashMap;
use std::sync::Arc;

use leaselink_proto::ids::{ListingId, PrincipalId};
use leaselink_proto::thread::{ListingCard, Profile, Thread};

use crate::auth::{AuthError, AuthRetryError, AuthSession, with_auth_retry};
use crate::backend::{ApiError, MarketplaceApi};

/// Placeholder shown when a counterpart's profile cannot be resolved.
pub const UNKNOWN_USER: &str = "Unknown user";

/// One enriched row of the inbox listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    /// The underlying thread.
    pub thread: Thread,
    /// The participant that is not the caller.
    pub counterpart: PrincipalId,
    /// Counterpart display name, or [`UNKNOWN_USER`].
    pub counterpart_name: String,
    /// Counterpart avatar, when the profile resolved and has one.
    pub counterpart_avatar: Option<String>,
    /// Listing title, when the thread has a listing that resolved.
    pub listing_title: Option<String>,
}

/// Errors from listing threads.
#[derive(Debug, thiserror::Error)]
pub enum ThreadsError {
    /// The session could not produce a usable token.
    #[error("session error: {0}")]
    Auth(#[from] AuthError),

    /// The thread list request itself failed.
    #[error("thread list unavailable: {0}")]
    Api(#[from] ApiError),
}

impl From<AuthRetryError> for ThreadsError {
    fn from(e: AuthRetryError) -> Self {
        match e {
            AuthRetryError::Auth(e) => Self::Auth(e),
            AuthRetryError::Api(e) => Self::Api(e),
        }
    }
}

/// Read side of the inbox: thread listing with batched enrichment.
#[derive(Debug)]
pub struct ThreadRepository<A, S> {
    api: Arc<A>,
    session: Arc<S>,
    me: PrincipalId,
}

impl<A: MarketplaceApi, S: AuthSession> ThreadRepository<A, S> {
    /// Creates a repository reading on behalf of `me`.
    pub fn new(api: Arc<A>, session: Arc<S>, me: PrincipalId) -> Self {
        Self { api, session, me }
    }

    /// Lists the caller's threads, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadsError`] only when the thread list itself cannot be
    /// fetched; enrichment failures degrade to placeholders.
    pub async fn list(&self) -> Result<Vec<ThreadSummary>, ThreadsError> {
        let mut threads = with_auth_retry(self.session.as_ref(), |token| {
            let api = Arc::clone(&self.api);
            async move { api.list_threads(&token).await }
        })
        .await?;

        threads.sort_by(|a, b| b.last_modified.cmp(&a.last_modified).then(a.id.as_str().cmp(b.id.as_str())));

        let (profiles, listings) = self.enrichment_for(&threads).await;

        Ok(threads
            .into_iter()
            .map(|thread| {
                let counterpart = thread.counterpart(&self.me).clone();
                let profile = profiles.get(&counterpart);
                let listing_title = thread
                    .listing
                    .as_ref()
                    .and_then(|id| listings.get(id))
                    .map(|card| card.title.clone());
                ThreadSummary {
                    counterpart_name: profile
                        .map_or_else(|| UNKNOWN_USER.to_string(), |p| p.display_name.clone()),
                    counterpart_avatar: profile.and_then(|p| p.avatar_url.clone()),
                    counterpart,
                    listing_title,
                    thread,
                }
            })
            .collect())
    }

    /// Runs the two batched enrichment lookups for a page of threads.
    ///
    /// One `profiles_by_ids` and one `listings_by_ids` call, no matter how
    /// many threads the page holds. Failures are logged and yield empty
    /// maps, which the caller renders as placeholders.
    async fn enrichment_for(
        &self,
        threads: &[Thread],
    ) -> (
        HashMap<PrincipalId, Profile>,
        HashMap<ListingId, ListingCard>,
    ) {
        let mut counterpart_ids: Vec<PrincipalId> = Vec::new();
        let mut listing_ids: Vec<ListingId> = Vec::new();
        for thread in threads {
            let counterpart = thread.counterpart(&self.me);
            if !counterpart_ids.contains(counterpart) {
                counterpart_ids.push(counterpart.clone());
            }
            if let Some(listing) = &thread.listing
                && !listing_ids.contains(listing)
            {
                listing_ids.push(listing.clone());
            }
        }

        let profiles = if counterpart_ids.is_empty() {
            HashMap::new()
        } else {
            match with_auth_retry(self.session.as_ref(), |token| {
                let api = Arc::clone(&self.api);
                let ids = counterpart_ids.clone();
                async move { api.profiles_by_ids(&token, &ids).await }
            })
            .await
            {
                Ok(profiles) => profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "profile enrichment failed, using placeholders");
                    HashMap::new()
                }
            }
        };

        let listings = if listing_ids.is_empty() {
            HashMap::new()
        } else {
            match with_auth_retry(self.session.as_ref(), |token| {
                let api = Arc::clone(&self.api);
                let ids = listing_ids.clone();
                async move { api.listings_by_ids(&token, &ids).await }
            })
            .await
            {
                Ok(cards) => cards.into_iter().map(|c| (c.id.clone(), c)).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "listing enrichment failed, omitting titles");
                    HashMap::new()
                }
            }
        };

        (profiles, listings)
    }
}
