//! Session-scoped caches behind the feed.
//!
//! - [`ReferenceCache`] memoizes counterpart display records by
//!   `(namespace, id)` and coalesces concurrent misses
//! - [`EntityCache`] is a bounded LRU of hydrated entries
//! - [`Hydrator`] combines both to turn raw jobs into feed entries

mod entity;
mod hydrate;
mod reference;

pub use entity::{EntityCache, DEFAULT_CAPACITY};
pub use hydrate::{Hydrated, Hydrator};
pub use reference::{Lookup, ReferenceCache};
