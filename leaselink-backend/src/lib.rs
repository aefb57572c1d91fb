//! In-memory reference backend for the LeaseLink messaging core.
//!
//! Implements [`leaselink::backend::MarketplaceApi`] and
//! [`leaselink::backend::LiveChannels`] over plain in-process tables: a
//! global broadcast feed of inserted rows, per-thread presence rooms, and
//! an expiring bearer-token issuer. Used by the integration tests and for
//! local development; it is a faithful double of the hosted service's
//! observable behavior, not a product.

pub mod session;
pub mod store;

pub use session::TestSession;
pub use store::Backend;
