//! Error taxonomy surfaced by the feed.
//!
//! Collaborators fail with `color_eyre::Report`; each feed component converts
//! those at its boundary so the UI only ever sees a [`FeedError`].

use crate::types::{JobId, ReferenceKey};
use thiserror::Error;

/// Recoverable feed errors. None of them invalidate already materialized data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
  /// A paginated fetch failed; retry with `refresh`/`load_more`
  #[error("failed to load jobs: {0}")]
  Fetch(String),

  /// The live subscription failed; retry with `refresh`
  #[error("live updates stopped: {0}")]
  Subscription(String),

  /// A counterpart lookup failed; the entry is shown with a placeholder
  #[error("failed to load {key}: {reason}")]
  Hydration { key: ReferenceKey, reason: String },

  /// A remote write failed and its optimistic patch was rolled back
  #[error("update of job {id} failed: {reason}")]
  Mutation { id: JobId, reason: String },

  /// Another optimistic mutation on the same job has not settled yet
  #[error("job {0} already has an update in flight")]
  MutationInFlight(JobId),

  /// The job is not in the materialized list
  #[error("job {0} is not in the current view")]
  UnknownEntity(JobId),
}

impl FeedError {
  pub(crate) fn fetch(report: &color_eyre::Report) -> Self {
    FeedError::Fetch(format!("{:#}", report))
  }

  pub(crate) fn subscription(report: &color_eyre::Report) -> Self {
    FeedError::Subscription(format!("{:#}", report))
  }

  pub(crate) fn mutation(id: JobId, report: &color_eyre::Report) -> Self {
    FeedError::Mutation {
      id,
      reason: format!("{:#}", report),
    }
  }
}

pub type Result<T> = std::result::Result<T, FeedError>;
