//! Mutation dispatch: send now when reachable, queue otherwise.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::manager::OperationQueueManager;
use super::operation::{OperationType, PendingOperation};
use super::session::OperationOutcome;
use crate::error::StudySyncError;

/// Where a submitted mutation ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "operation", rename_all = "snake_case")]
pub enum Submission {
    /// Delivered to the backend
    Sent(PendingOperation),
    /// Persisted for a later sync pass
    Queued(PendingOperation),
}

impl Submission {
    #[must_use]
    pub const fn operation(&self) -> &PendingOperation {
        match self {
            Self::Sent(op) | Self::Queued(op) => op,
        }
    }

    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Entry point for mutating user actions on one partition.
pub struct MutationDispatcher {
    manager: Arc<OperationQueueManager>,
}

impl MutationDispatcher {
    #[must_use]
    pub const fn new(manager: Arc<OperationQueueManager>) -> Self {
        Self { manager }
    }

    /// Submit a mutation.
    ///
    /// While online with nothing queued the request goes straight to the
    /// backend. A connectivity failure marks the monitor offline and queues
    /// the operation under the same id; while offline the operation is queued
    /// directly. If earlier changes are still queued the operation joins the
    /// queue behind them and, when online, a sync pass replays them in order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for malformed operations, the remote error for
    /// non-connectivity failures of a direct send, or the store error if
    /// queueing fails.
    pub async fn submit(
        &self,
        op_type: OperationType,
        endpoint: &str,
        payload: Option<Value>,
    ) -> Result<Submission, StudySyncError> {
        let operation = PendingOperation::new(op_type, endpoint, payload, self.manager.user_id())?;
        if !self.manager.partition().holds(operation.entity) {
            return Err(StudySyncError::InvalidInput(format!(
                "{} is not part of the {} queue",
                operation.endpoint,
                self.manager.partition()
            )));
        }

        let connectivity = self.manager.connectivity();
        if connectivity.is_online() {
            self.manager.load_pending_operations().await?;
        }

        if connectivity.is_online() && !self.manager.has_pending() {
            match self.manager.remote().send(operation.to_request()).await {
                Ok(()) => {
                    info!(id = %operation.id, endpoint = %operation.endpoint, "mutation sent");
                    return Ok(Submission::Sent(operation));
                },
                Err(e) if e.is_connectivity() => {
                    warn!(id = %operation.id, error = %e, "backend unreachable, queueing");
                    connectivity.report(false);
                },
                Err(e) => return Err(e),
            }
        }

        let operation = self.manager.enqueue(operation).await?;
        if connectivity.is_online() && self.replay_behind_backlog(&operation).await {
            return Ok(Submission::Sent(operation));
        }
        Ok(Submission::Queued(operation))
    }

    /// Replay the queue, reporting whether `operation` was delivered.
    async fn replay_behind_backlog(&self, operation: &PendingOperation) -> bool {
        debug!(id = %operation.id, "earlier changes queued, replaying in order");
        match self.manager.sync_operations().await {
            Ok(outcome) => outcome.session().is_some_and(|session| {
                session.operations.iter().any(|report| {
                    report.id == operation.id && report.outcome == OperationOutcome::Synced
                })
            }),
            Err(e) => {
                warn!(id = %operation.id, error = %e, "replay after queueing failed");
                false
            },
        }
    }
}
