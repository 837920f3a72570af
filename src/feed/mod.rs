//! The live job feed.
//!
//! [`JobFeed`] coordinates the pieces for one view:
//! - `query_spec` turns (user, role) into the query backing the view
//! - `pagination` fetches pages behind a cursor
//! - `subscription` keeps one live push subscription per view
//! - `optimistic` applies user actions before the store confirms them
//! - `search` projects the materialized list for display
//!
//! All state lives on the owner's thread. Network work runs on spawned tasks
//! whose results are collected in [`JobFeed::tick`]; every result carries the
//! view generation it was issued for and is ignored once that view is gone.

mod optimistic;
mod pagination;
mod query_spec;
mod search;
mod subscription;

pub use optimistic::{ActionKind, MutationOutcome, OptimisticMutationEngine};
pub use pagination::{
  fetch_page, FetchKind, FetchOutcome, FetchedPage, PageCursor, PaginatedFetchEngine,
};
pub use query_spec::{
  build_query_spec, Direction, OrderingKey, Predicate, QuerySpec, SortField, SortSpec,
  DEFAULT_PAGE_SIZE, FULFILLER_ACTIVE_STATUSES,
};
pub use search::{SearchFilterEngine, StatusFilter, DEFAULT_DEBOUNCE};
pub use subscription::{SubscriptionManager, SubscriptionState, SubscriptionUpdate};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::Hydrator;
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::store::RemoteStore;
use crate::types::{FeedEntry, JobId, JobPatch, Role, UserId};

const SETTLE_POLL: Duration = Duration::from_millis(5);

pub struct JobFeed {
  user_id: Option<UserId>,
  page_size: usize,
  spec: Option<QuerySpec>,
  generation: u64,
  /// Materialized list, unfiltered
  entries: Vec<FeedEntry>,
  fetcher: PaginatedFetchEngine,
  subscription: SubscriptionManager,
  mutations: OptimisticMutationEngine,
  search: SearchFilterEngine,
  last_error: Option<FeedError>,
}

impl JobFeed {
  pub fn new(store: Arc<dyn RemoteStore>, hydrator: Hydrator, config: &Config) -> Self {
    Self {
      user_id: None,
      page_size: config.page_size,
      spec: None,
      generation: 0,
      entries: Vec::new(),
      fetcher: PaginatedFetchEngine::new(Arc::clone(&store), hydrator.clone()),
      subscription: SubscriptionManager::new(Arc::clone(&store), hydrator),
      mutations: OptimisticMutationEngine::new(store),
      search: SearchFilterEngine::new(config.search_debounce()),
      last_error: None,
    }
  }

  /// Show `role`'s view for `user_id`.
  ///
  /// A different query tears down the live subscription, discards the list
  /// and the cursor, and starts over. Returns false when the view is already
  /// showing this query.
  pub fn activate(&mut self, user_id: UserId, role: Role) -> bool {
    let spec = build_query_spec(&user_id, role).with_page_size(self.page_size);
    if self.spec.as_ref() == Some(&spec) && self.subscription.is_live() {
      debug!(query = %spec.fingerprint(), "view already active");
      return false;
    }

    self.generation += 1;
    info!(
      query = %spec.fingerprint(),
      generation = self.generation,
      view = %spec.describe(),
      "activating view"
    );

    self.user_id = Some(user_id);
    self.entries.clear();
    self.last_error = None;
    self.search.cancel_pending();
    self.mutations.clear();
    self.fetcher.load_fresh(&spec, self.generation);
    self.subscription.activate(spec.clone(), self.generation);
    self.spec = Some(spec);
    true
  }

  /// Switch the active view to `role` for the current user
  pub fn switch_role(&mut self, role: Role) -> bool {
    match self.user_id.clone() {
      Some(user_id) => self.activate(user_id, role),
      None => false,
    }
  }

  /// Operator-initiated retry: reload from the first page and re-subscribe
  /// if the live subscription is down. The list stays visible until the new
  /// first page lands.
  pub fn refresh(&mut self) {
    let Some(spec) = self.spec.clone() else {
      return;
    };
    self.last_error = None;
    self.fetcher.load_fresh(&spec, self.generation);
    if !self.subscription.is_live() {
      self.subscription.activate(spec, self.generation);
    }
  }

  /// Fetch the next page. Returns false if nothing was issued (a fetch is
  /// already in flight, the first page hasn't landed, or there is no more).
  pub fn load_more(&mut self) -> bool {
    match &self.spec {
      Some(spec) => self.fetcher.load_more(spec, self.generation),
      None => false,
    }
  }

  /// Debounced; applied by a later `tick`
  pub fn set_search_query(&mut self, text: &str) {
    self.search.set_query(text, Instant::now());
  }

  pub fn set_status_filter(&mut self, filter: StatusFilter) {
    self.search.set_status_filter(filter);
  }

  /// Apply `action` to the job immediately and write it remotely
  pub fn apply_optimistic_action(&mut self, id: &JobId, action: ActionKind) -> Result<()> {
    self.apply_optimistic(id, action.patch(), action.removes_on_success())?;
    self.commit(id)
  }

  /// Patch the job locally without writing yet
  pub fn apply_optimistic(
    &mut self,
    id: &JobId,
    patch: JobPatch,
    remove_on_success: bool,
  ) -> Result<()> {
    self
      .mutations
      .apply_optimistic(&mut self.entries, id, patch, remove_on_success)
  }

  /// Write a previously applied patch remotely
  pub fn commit(&mut self, id: &JobId) -> Result<()> {
    self.mutations.commit(id)
  }

  /// Revert a patch applied with `apply_optimistic` that was never committed
  pub fn cancel_optimistic(&mut self, id: &JobId) -> Result<()> {
    self.mutations.cancel(&mut self.entries, id)
  }

  /// Collect finished network work and due debounces. Returns true when
  /// anything visible may have changed.
  pub fn tick(&mut self) -> bool {
    let mut changed = false;

    if let Some(outcome) = self.fetcher.poll() {
      changed |= self.apply_fetch(outcome.kind, outcome.generation, outcome.result);
    }

    for update in self.subscription.poll() {
      changed |= self.apply_subscription(update);
    }

    for outcome in self.mutations.poll(&mut self.entries) {
      if let MutationOutcome::RolledBack(error) = outcome {
        self.last_error = Some(error);
      }
      changed = true;
    }

    if self.search.tick(Instant::now()) {
      changed = true;
    }
    changed
  }

  /// True when no fetch, subscription handshake, remote write or debounce is
  /// outstanding
  pub fn is_settled(&self) -> bool {
    self.fetcher.is_idle()
      && self.mutations.is_idle()
      && self.subscription.state() != &SubscriptionState::Subscribing
      && !self.search.has_pending()
  }

  /// Tick until settled
  pub async fn settle(&mut self) {
    loop {
      self.tick();
      if self.is_settled() {
        break;
      }
      tokio::time::sleep(SETTLE_POLL).await;
    }
  }

  /// Release everything tied to the view
  pub fn unmount(&mut self) {
    self.subscription.teardown();
    self.fetcher.reset();
    self.mutations.clear();
    self.search.cancel_pending();
    self.entries.clear();
    self.spec = None;
    self.generation += 1;
    info!("feed unmounted");
  }

  fn apply_fetch(
    &mut self,
    kind: FetchKind,
    generation: u64,
    result: Result<FetchedPage>,
  ) -> bool {
    if generation != self.generation {
      debug!(generation, current = self.generation, "ignoring stale page");
      return false;
    }

    match result {
      Ok(mut page) => {
        self.mutations.overlay(&mut page.entries);
        self.note_hydration_errors(page.hydration_errors);
        match kind {
          FetchKind::Fresh => self.entries = page.entries,
          FetchKind::More => {
            let known: HashSet<JobId> = self.entries.iter().map(|e| e.id().clone()).collect();
            self.entries.extend(
              page
                .entries
                .into_iter()
                .filter(|entry| !known.contains(entry.id())),
            );
          }
        }
      }
      Err(error) => self.last_error = Some(error),
    }
    true
  }

  fn apply_subscription(&mut self, update: SubscriptionUpdate) -> bool {
    match update {
      SubscriptionUpdate::Snapshot {
        generation,
        mut entries,
        hydration_errors,
      } => {
        if generation != self.generation {
          debug!(generation, current = self.generation, "ignoring stale snapshot");
          return false;
        }
        self.mutations.overlay(&mut entries);
        self.note_hydration_errors(hydration_errors);
        debug!(entries = entries.len(), "snapshot replaced list");
        self.entries = entries;
        true
      }
      SubscriptionUpdate::Failed { generation, error } => {
        if generation != self.generation {
          return false;
        }
        self.last_error = Some(error);
        true
      }
    }
  }

  fn note_hydration_errors(&mut self, errors: Vec<FeedError>) {
    if self.last_error.is_none() {
      self.last_error = errors.into_iter().last();
    }
  }

  // Accessors for UI rendering

  /// Materialized list after search and status filtering
  pub fn visible_entities(&self) -> Vec<FeedEntry> {
    self
      .search
      .filter(&self.entries)
      .into_iter()
      .cloned()
      .collect()
  }

  /// Materialized list before filtering
  pub fn entries(&self) -> &[FeedEntry] {
    &self.entries
  }

  pub fn is_loading(&self) -> bool {
    self.fetcher.is_loading()
  }

  pub fn is_loading_more(&self) -> bool {
    self.fetcher.is_loading_more()
  }

  pub fn has_more(&self) -> bool {
    self.fetcher.has_more()
  }

  pub fn cursor(&self) -> &PageCursor {
    self.fetcher.cursor()
  }

  pub fn last_error(&self) -> Option<&FeedError> {
    self.last_error.as_ref()
  }

  pub fn dismiss_error(&mut self) {
    self.last_error = None;
  }

  pub fn subscription_state(&self) -> &SubscriptionState {
    self.subscription.state()
  }

  pub fn query_spec(&self) -> Option<&QuerySpec> {
    self.spec.as_ref()
  }

  pub fn role(&self) -> Option<Role> {
    self.spec.as_ref().map(|spec| spec.role)
  }

  pub fn search_query(&self) -> &str {
    self.search.query()
  }

  pub fn status_filter(&self) -> &StatusFilter {
    self.search.status_filter()
  }

  pub fn is_mutation_pending(&self, id: &JobId) -> bool {
    self.mutations.is_pending(id)
  }
}
