//! Sync pass bookkeeping.
//!
//! A [`SyncSession`] is rebuilt for every pass and never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::operation::{OperationType, PendingOperation, Partition};
use crate::error::FailureClass;

/// What to do with operations the backend keeps rejecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Keep rejected operations queued until they succeed or are cleared.
    RetryForever,
    /// Move an operation to the dead-letter partition once a rejection
    /// brings its attempt count to `max_attempts`.
    DeadLetter { max_attempts: u32 },
}

impl RejectionPolicy {
    /// Default attempt limit for dead-lettering.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Whether a failure of `class` after `attempts` failed tries should
    /// dead-letter the operation.
    #[must_use]
    pub const fn should_dead_letter(&self, class: FailureClass, attempts: u32) -> bool {
        match self {
            Self::RetryForever => false,
            Self::DeadLetter { max_attempts } => {
                matches!(class, FailureClass::Rejected) && attempts >= *max_attempts
            },
        }
    }
}

impl Default for RejectionPolicy {
    fn default() -> Self {
        Self::DeadLetter {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Why a pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    Empty,
    AlreadySyncing,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Empty => "nothing queued",
            Self::AlreadySyncing => "already syncing",
        };
        write!(f, "{s}")
    }
}

/// Result of replaying one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Remote call succeeded; record deleted
    Synced,
    /// Remote call failed; record kept
    Failed { class: FailureClass, error: String },
    /// Not attempted because an earlier operation on the same target failed
    Skipped,
    /// Rejected too often; moved to the dead-letter partition
    DeadLettered { error: String },
}

/// One line of a session report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub endpoint: String,
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

/// One replay pass over a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSession {
    pub partition: Partition,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub operations: Vec<OperationReport>,
    /// The pass stopped early on a connectivity failure
    pub aborted_on_connectivity: bool,
}

impl SyncSession {
    /// Start a session.
    #[must_use]
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            started_at: Utc::now(),
            finished_at: None,
            operations: Vec::new(),
            aborted_on_connectivity: false,
        }
    }

    /// Record the outcome for an operation.
    pub fn record(&mut self, operation: &PendingOperation, outcome: OperationOutcome) {
        self.operations.push(OperationReport {
            id: operation.id.clone(),
            op_type: operation.op_type,
            endpoint: operation.endpoint.clone(),
            outcome,
        });
    }

    /// Mark the session finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    fn count(&self, pred: impl Fn(&OperationOutcome) -> bool) -> usize {
        self.operations.iter().filter(|r| pred(&r.outcome)).count()
    }

    #[must_use]
    pub fn synced_count(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Synced))
    }

    /// Failed and dead-lettered operations.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                OperationOutcome::Failed { .. } | OperationOutcome::DeadLettered { .. }
            )
        })
    }

    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Skipped))
    }

    #[must_use]
    pub fn dead_lettered_count(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::DeadLettered { .. }))
    }
}

/// What a call to `sync_operations` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncOutcome {
    Skipped { reason: SkipReason },
    Completed { session: SyncSession },
}

impl SyncOutcome {
    /// The session, if a pass ran.
    #[must_use]
    pub const fn session(&self) -> Option<&SyncSession> {
        match self {
            Self::Completed { session } => Some(session),
            Self::Skipped { .. } => None,
        }
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.session().map_or(0, SyncSession::failed_count)
    }

    #[must_use]
    pub fn aborted_on_connectivity(&self) -> bool {
        self.session().is_some_and(|s| s.aborted_on_connectivity)
    }
}
