//! Cursor-based page fetching.
//!
//! Fetches run on spawned tasks and report back over a channel that the feed
//! drains on tick. Starting a fresh load drops the receiver of any fetch still
//! in flight, so a late response for an abandoned view lands nowhere.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::query_spec::{OrderingKey, QuerySpec};
use crate::cache::Hydrator;
use crate::error::FeedError;
use crate::store::{CursorToken, RemoteStore};
use crate::types::FeedEntry;

/// Where the next page starts.
///
/// Reset whenever the query changes; only advanced by successful fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
  token: Option<CursorToken>,
  has_more: bool,
  last_seen: Option<OrderingKey>,
}

impl Default for PageCursor {
  fn default() -> Self {
    Self::empty()
  }
}

impl PageCursor {
  /// Start of the result set
  pub fn empty() -> Self {
    Self {
      token: None,
      has_more: true,
      last_seen: None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.token.is_none()
  }

  pub fn token(&self) -> Option<&CursorToken> {
    self.token.as_ref()
  }

  pub fn has_more(&self) -> bool {
    self.has_more
  }

  /// Ordering key of the last entry kept from a page
  pub fn last_seen_ordering_key(&self) -> Option<&OrderingKey> {
    self.last_seen.as_ref()
  }
}

/// Hydrated page plus the cursor after it
#[derive(Debug)]
pub struct FetchedPage {
  pub entries: Vec<FeedEntry>,
  pub next_cursor: PageCursor,
  pub hydration_errors: Vec<FeedError>,
}

/// Fetch and hydrate one page of `spec` starting at `cursor`.
///
/// `has_more` is false exactly when the store returned a short page.
pub async fn fetch_page(
  store: &dyn RemoteStore,
  hydrator: &Hydrator,
  spec: &QuerySpec,
  cursor: &PageCursor,
) -> Result<FetchedPage, FeedError> {
  let page = store
    .query(spec, cursor.token())
    .await
    .map_err(|e| FeedError::fetch(&e))?;

  let returned = page.records.len();
  let hydrated = hydrator.hydrate_all(spec.role, page.records).await;

  let next_cursor = PageCursor {
    token: page.next.or_else(|| cursor.token.clone()),
    has_more: returned >= spec.page_size,
    last_seen: hydrated
      .entries
      .last()
      .map(|entry| OrderingKey::of(&entry.job))
      .or_else(|| cursor.last_seen.clone()),
  };

  Ok(FetchedPage {
    entries: hydrated.entries,
    next_cursor,
    hydration_errors: hydrated.errors,
  })
}

/// Whether a fetch replaces the list or extends it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
  Fresh,
  More,
}

/// A completed fetch, tagged with the view generation that issued it
#[derive(Debug)]
pub struct FetchOutcome {
  pub kind: FetchKind,
  pub generation: u64,
  pub result: Result<FetchedPage, FeedError>,
}

struct InFlight {
  kind: FetchKind,
  generation: u64,
  receiver: mpsc::UnboundedReceiver<Result<FetchedPage, FeedError>>,
}

/// Owns the cursor and at most one in-flight fetch
pub struct PaginatedFetchEngine {
  store: Arc<dyn RemoteStore>,
  hydrator: Hydrator,
  cursor: PageCursor,
  in_flight: Option<InFlight>,
}

impl PaginatedFetchEngine {
  pub fn new(store: Arc<dyn RemoteStore>, hydrator: Hydrator) -> Self {
    Self {
      store,
      hydrator,
      cursor: PageCursor::empty(),
      in_flight: None,
    }
  }

  pub fn cursor(&self) -> &PageCursor {
    &self.cursor
  }

  pub fn has_more(&self) -> bool {
    self.cursor.has_more
  }

  pub fn is_loading(&self) -> bool {
    matches!(&self.in_flight, Some(f) if f.kind == FetchKind::Fresh)
  }

  pub fn is_loading_more(&self) -> bool {
    matches!(&self.in_flight, Some(f) if f.kind == FetchKind::More)
  }

  pub fn is_idle(&self) -> bool {
    self.in_flight.is_none()
  }

  /// Start over from the first page, abandoning any fetch in flight
  pub fn load_fresh(&mut self, spec: &QuerySpec, generation: u64) {
    self.cancel();
    self.cursor = PageCursor::empty();
    self.start(spec, generation, FetchKind::Fresh);
  }

  /// Fetch the page after the cursor.
  ///
  /// Returns false without fetching while another fetch is in flight, before
  /// the first page has landed, or once the end has been reached.
  pub fn load_more(&mut self, spec: &QuerySpec, generation: u64) -> bool {
    if self.in_flight.is_some() || self.cursor.is_empty() || !self.cursor.has_more {
      return false;
    }
    self.start(spec, generation, FetchKind::More);
    true
  }

  /// Forget the fetch in flight, if any. The cursor is left alone.
  pub fn cancel(&mut self) {
    if let Some(abandoned) = self.in_flight.take() {
      debug!(generation = abandoned.generation, "abandoning in-flight fetch");
    }
  }

  /// Forget the cursor and any fetch in flight
  pub fn reset(&mut self) {
    self.cancel();
    self.cursor = PageCursor::empty();
  }

  /// Collect a finished fetch. The cursor advances only on success.
  pub fn poll(&mut self) -> Option<FetchOutcome> {
    let in_flight = self.in_flight.as_mut()?;

    let result = match in_flight.receiver.try_recv() {
      Ok(result) => result,
      Err(mpsc::error::TryRecvError::Empty) => return None,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        Err(FeedError::Fetch("fetch was cancelled".to_string()))
      }
    };

    let InFlight {
      kind, generation, ..
    } = self.in_flight.take()?;

    match &result {
      Ok(page) => {
        self.cursor = page.next_cursor.clone();
        info!(
          ?kind,
          generation,
          entries = page.entries.len(),
          has_more = self.cursor.has_more,
          "page loaded"
        );
      }
      Err(e) => warn!(?kind, generation, error = %e, "page fetch failed"),
    }

    Some(FetchOutcome {
      kind,
      generation,
      result,
    })
  }

  fn start(&mut self, spec: &QuerySpec, generation: u64, kind: FetchKind) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.in_flight = Some(InFlight {
      kind,
      generation,
      receiver: rx,
    });

    debug!(?kind, generation, query = %spec.fingerprint(), "fetching page");
    let store = Arc::clone(&self.store);
    let hydrator = self.hydrator.clone();
    let spec = spec.clone();
    let cursor = self.cursor.clone();
    tokio::spawn(async move {
      let result = fetch_page(store.as_ref(), &hydrator, &spec, &cursor).await;
      // Receiver is gone if the fetch was abandoned
      let _ = tx.send(result);
    });
  }
}
