//! Client-side search and status filtering over the materialized list.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::types::{FeedEntry, JobStatus};

/// Default quiet period before typed text is applied
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StatusFilter {
  #[default]
  All,
  Only(JobStatus),
}

impl StatusFilter {
  pub fn matches(&self, status: &JobStatus) -> bool {
    match self {
      StatusFilter::All => true,
      StatusFilter::Only(wanted) => wanted == status,
    }
  }
}

impl FromStr for StatusFilter {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("all") {
      Ok(StatusFilter::All)
    } else {
      Ok(StatusFilter::Only(JobStatus::from(s.trim().to_string())))
    }
  }
}

impl fmt::Display for StatusFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StatusFilter::All => f.write_str("all"),
      StatusFilter::Only(status) => write!(f, "{}", status),
    }
  }
}

/// Debounced free-text search plus an immediate status filter.
///
/// Filtering is a pure projection; it never touches the store or the caches.
#[derive(Debug)]
pub struct SearchFilterEngine {
  debounce: Duration,
  /// Lowercased text currently in effect
  applied: String,
  pending: Option<(String, Instant)>,
  status: StatusFilter,
}

impl Default for SearchFilterEngine {
  fn default() -> Self {
    Self::new(DEFAULT_DEBOUNCE)
  }
}

impl SearchFilterEngine {
  pub fn new(debounce: Duration) -> Self {
    Self {
      debounce,
      applied: String::new(),
      pending: None,
      status: StatusFilter::All,
    }
  }

  /// Text in effect (lowercased)
  pub fn query(&self) -> &str {
    &self.applied
  }

  pub fn status_filter(&self) -> &StatusFilter {
    &self.status
  }

  pub fn has_pending(&self) -> bool {
    self.pending.is_some()
  }

  /// Schedule `text` to take effect once input has been quiet for the
  /// debounce period. Each call restarts the wait.
  pub fn set_query(&mut self, text: &str, now: Instant) {
    self.pending = Some((text.trim().to_lowercase(), now + self.debounce));
  }

  /// Takes effect immediately
  pub fn set_status_filter(&mut self, filter: StatusFilter) {
    self.status = filter;
  }

  pub fn cancel_pending(&mut self) {
    self.pending = None;
  }

  /// Apply the pending query if its deadline has passed. Returns true when
  /// the filter changed.
  pub fn tick(&mut self, now: Instant) -> bool {
    match &self.pending {
      Some((_, deadline)) if *deadline <= now => {}
      _ => return false,
    }
    let Some((text, _)) = self.pending.take() else {
      return false;
    };
    if text == self.applied {
      return false;
    }
    debug!(query = %text, "search applied");
    self.applied = text;
    true
  }

  pub fn matches(&self, entry: &FeedEntry) -> bool {
    if !self.status.matches(&entry.job.status) {
      return false;
    }
    if self.applied.is_empty() {
      return true;
    }
    entry.display_name().to_lowercase().contains(&self.applied)
      || entry
        .job
        .notes
        .as_deref()
        .map(|notes| notes.to_lowercase().contains(&self.applied))
        .unwrap_or(false)
  }

  /// Entries passing both filters, in list order
  pub fn filter<'a>(&self, entries: &'a [FeedEntry]) -> Vec<&'a FeedEntry> {
    entries.iter().filter(|entry| self.matches(entry)).collect()
  }
}
