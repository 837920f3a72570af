//! Everything scoped to one logged-in user.
//!
//! The caches live here rather than in the feed: they survive view and role
//! switches and are dropped together on logout.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::cache::{EntityCache, Hydrator, ReferenceCache};
use crate::config::Config;
use crate::feed::JobFeed;
use crate::store::{Identity, RemoteStore};
use crate::types::{Role, UserId};

pub struct Session {
  user_id: UserId,
  references: Arc<ReferenceCache>,
  entities: Arc<Mutex<EntityCache>>,
  feed: JobFeed,
}

impl Session {
  /// Build the caches and the feed, and activate the identity's view.
  ///
  /// Must be called inside a tokio runtime.
  pub fn login(store: Arc<dyn RemoteStore>, identity: &dyn Identity, config: &Config) -> Self {
    let user_id = identity.current_user_id();
    let role = identity.current_user_role();

    let references = Arc::new(ReferenceCache::new(Arc::clone(&store)));
    let entities = Arc::new(Mutex::new(EntityCache::new(config.entity_cache_capacity)));
    let hydrator = Hydrator::new(
      Arc::clone(&references),
      Arc::clone(&entities),
      config.placeholder_name.clone(),
    );

    let mut feed = JobFeed::new(store, hydrator, config);
    info!(user = %user_id, %role, "session started");
    feed.activate(user_id.clone(), role);

    Self {
      user_id,
      references,
      entities,
      feed,
    }
  }

  pub fn user_id(&self) -> &UserId {
    &self.user_id
  }

  pub fn feed(&self) -> &JobFeed {
    &self.feed
  }

  pub fn feed_mut(&mut self) -> &mut JobFeed {
    &mut self.feed
  }

  pub fn switch_role(&mut self, role: Role) -> bool {
    self.feed.switch_role(role)
  }

  /// Resolved counterpart records held
  pub fn cached_references(&self) -> usize {
    self.references.len()
  }

  /// Hydrated entries held
  pub fn cached_entities(&self) -> usize {
    self.entities().len()
  }

  /// Tear the feed down and drop every cached record
  pub fn logout(&mut self) {
    self.feed.unmount();
    self.references.clear();
    self.entities().clear();
    info!(user = %self.user_id, "session ended");
  }

  fn entities(&self) -> MutexGuard<'_, EntityCache> {
    self.entities.lock().unwrap_or_else(|e| e.into_inner())
  }
}
