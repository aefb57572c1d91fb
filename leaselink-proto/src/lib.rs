//! Shared data model for the LeaseLink messaging core.
//!
//! Everything the client exchanges with the hosted marketplace backend is
//! shaped here: identities, threads, messages, presence records, and the
//! JSON row codec used by the change feed.

pub mod api;
pub mod codec;
pub mod ids;
pub mod message;
pub mod presence;
pub mod thread;
