//! Live job feed: paginated queries, push subscriptions, counterpart
//! hydration, optimistic updates and client-side search over a remote
//! document store.

pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod logging;
pub mod session;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::FeedError;
pub use feed::{ActionKind, JobFeed, StatusFilter, SubscriptionState};
pub use session::Session;
pub use store::{Identity, MemoryStore, RemoteStore, StaticIdentity};
