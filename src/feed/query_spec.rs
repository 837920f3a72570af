//! Declarative description of what a feed view shows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

use crate::types::{JobId, JobRecord, JobStatus, Role, UserId};

/// Jobs per page unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Statuses a fulfiller still has to act on
pub const FULFILLER_ACTIVE_STATUSES: [JobStatus; 3] = [
  JobStatus::PendingApproval,
  JobStatus::InEscrow,
  JobStatus::ProcessingPayment,
];

/// A single filter clause. All clauses of a [`QuerySpec`] must hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
  OwnerIs(UserId),
  ProviderIs(UserId),
  StatusIn(Vec<JobStatus>),
}

impl Predicate {
  pub fn matches(&self, job: &JobRecord) -> bool {
    match self {
      Predicate::OwnerIs(user) => &job.owner_id == user,
      Predicate::ProviderIs(user) => &job.provider_id == user,
      Predicate::StatusIn(statuses) => statuses.contains(&job.status),
    }
  }

  fn describe(&self) -> String {
    match self {
      Predicate::OwnerIs(user) => format!("ownerId == {}", user),
      Predicate::ProviderIs(user) => format!("providerId == {}", user),
      Predicate::StatusIn(statuses) => {
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        format!("status in [{}]", names.join(", "))
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
  ScheduledAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
  Ascending,
  Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortSpec {
  pub field: SortField,
  pub direction: Direction,
}

/// Position of a job in a feed's ordering.
///
/// `created_at` then `id` break ties so the order is total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderingKey {
  pub scheduled_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub id: JobId,
}

impl OrderingKey {
  pub fn of(job: &JobRecord) -> Self {
    Self {
      scheduled_at: job.scheduled_at,
      created_at: job.created_at,
      id: job.id.clone(),
    }
  }
}

/// Immutable query for one view activation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySpec {
  pub role: Role,
  pub predicates: Vec<Predicate>,
  pub sort: SortSpec,
  pub page_size: usize,
}

/// Map the current user and active view to the query that backs it.
///
/// Equal inputs always give structurally equal specs.
pub fn build_query_spec(user_id: &UserId, role: Role) -> QuerySpec {
  let predicates = match role {
    Role::Fulfiller => vec![
      Predicate::ProviderIs(user_id.clone()),
      Predicate::StatusIn(FULFILLER_ACTIVE_STATUSES.to_vec()),
    ],
    Role::Requester => vec![Predicate::OwnerIs(user_id.clone())],
  };

  QuerySpec {
    role,
    predicates,
    sort: SortSpec {
      field: SortField::ScheduledAt,
      direction: Direction::Descending,
    },
    page_size: DEFAULT_PAGE_SIZE,
  }
}

impl QuerySpec {
  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  pub fn matches(&self, job: &JobRecord) -> bool {
    self.predicates.iter().all(|p| p.matches(job))
  }

  /// Compare two positions under this spec's sort
  pub fn compare(&self, a: &OrderingKey, b: &OrderingKey) -> Ordering {
    let primary = match self.sort.field {
      SortField::ScheduledAt => a.scheduled_at.cmp(&b.scheduled_at),
    };
    let ordered = primary.then_with(|| a.created_at.cmp(&b.created_at));
    let ordered = match self.sort.direction {
      Direction::Ascending => ordered,
      Direction::Descending => ordered.reverse(),
    };
    ordered.then_with(|| a.id.cmp(&b.id))
  }

  /// Sort jobs in place under this spec's ordering
  pub fn sort_jobs(&self, jobs: &mut [JobRecord]) {
    jobs.sort_by(|a, b| self.compare(&OrderingKey::of(a), &OrderingKey::of(b)));
  }

  /// Human readable form, also the fingerprint input
  pub fn describe(&self) -> String {
    let filters: Vec<String> = self.predicates.iter().map(|p| p.describe()).collect();
    let direction = match self.sort.direction {
      Direction::Ascending => "asc",
      Direction::Descending => "desc",
    };
    format!(
      "{} view: {} order by scheduledAt {} limit {}",
      self.role,
      filters.join(" AND "),
      direction,
      self.page_size
    )
  }

  /// Stable, fixed-length identifier for logs
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.describe().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn job(id: &str, owner: &str, provider: &str, status: JobStatus, hour: u32) -> JobRecord {
    JobRecord {
      id: JobId::new(id),
      owner_id: UserId::new(owner),
      provider_id: UserId::new(provider),
      status,
      scheduled_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()),
      amount: None,
      notes: None,
      created_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
    }
  }

  #[test]
  fn test_fulfiller_spec() {
    let spec = build_query_spec(&UserId::new("u1"), Role::Fulfiller);
    assert_eq!(spec.page_size, 20);
    assert_eq!(spec.sort.direction, Direction::Descending);
    assert!(spec.matches(&job("a", "x", "u1", JobStatus::PendingApproval, 1)));
    assert!(spec.matches(&job("b", "x", "u1", JobStatus::InEscrow, 1)));
    assert!(spec.matches(&job("c", "x", "u1", JobStatus::ProcessingPayment, 1)));
    assert!(!spec.matches(&job("d", "x", "u1", JobStatus::InProgress, 1)));
    assert!(!spec.matches(&job("e", "x", "u2", JobStatus::PendingApproval, 1)));
  }

  #[test]
  fn test_requester_spec_has_no_status_restriction() {
    let spec = build_query_spec(&UserId::new("u1"), Role::Requester);
    assert!(spec.matches(&job("a", "u1", "p", JobStatus::Completed, 1)));
    assert!(spec.matches(&job("b", "u1", "p", JobStatus::Unknown("x".into()), 1)));
    assert!(!spec.matches(&job("c", "u2", "u1", JobStatus::PendingApproval, 1)));
  }

  #[test]
  fn test_spec_is_deterministic() {
    let user = UserId::new("u1");
    let a = build_query_spec(&user, Role::Fulfiller);
    let b = build_query_spec(&user, Role::Fulfiller);
    assert_eq!(a, b);
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a, build_query_spec(&user, Role::Requester));
    assert_ne!(
      a.fingerprint(),
      build_query_spec(&user, Role::Requester).fingerprint()
    );
  }

  #[test]
  fn test_sort_descending_with_missing_schedule_last() {
    let spec = build_query_spec(&UserId::new("u1"), Role::Requester);
    let mut malformed = job("m", "u1", "p", JobStatus::Paid, 0);
    malformed.scheduled_at = None;
    let mut jobs = vec![
      job("early", "u1", "p", JobStatus::Paid, 8),
      malformed,
      job("late", "u1", "p", JobStatus::Paid, 18),
    ];
    spec.sort_jobs(&mut jobs);
    let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["late", "early", "m"]);
  }
}
