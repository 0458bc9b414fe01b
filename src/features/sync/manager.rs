//! Operation queue manager.
//!
//! One manager owns one partition of the queue store for the active user. It
//! persists intents, keeps an ordered in-memory view of them, and replays
//! them against the remote API.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::operation::{OperationType, PendingOperation, Partition};
use super::session::{OperationOutcome, RejectionPolicy, SkipReason, SyncOutcome, SyncSession};
use super::store::{DeadLetter, QueueStats, QueueStore};
use crate::error::{FailureClass, StudySyncError};
use crate::features::background::{BackgroundSyncRegistrar, UnavailableBackgroundSync};
use crate::features::connectivity::ConnectivityMonitor;
use crate::remote::RemoteApi;

/// Non-reentrant flag held for the duration of a pass.
///
/// Cleared on drop, so early returns and errors release it.
pub(crate) struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Queue manager for one partition and one user.
pub struct OperationQueueManager {
    partition: Partition,
    user_id: String,
    store: Arc<dyn QueueStore>,
    remote: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
    background: Arc<dyn BackgroundSyncRegistrar>,
    policy: RejectionPolicy,
    pending: RwLock<Vec<PendingOperation>>,
    syncing: AtomicBool,
    last_failed: AtomicUsize,
}

impl OperationQueueManager {
    /// Create a manager with no background facility and the default policy.
    #[must_use]
    pub fn new(
        partition: Partition,
        user_id: impl Into<String>,
        store: Arc<dyn QueueStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            partition,
            user_id: user_id.into(),
            store,
            remote,
            connectivity,
            background: Arc::new(UnavailableBackgroundSync::default()),
            policy: RejectionPolicy::default(),
            pending: RwLock::new(Vec::new()),
            syncing: AtomicBool::new(false),
            last_failed: AtomicUsize::new(0),
        }
    }

    /// Use a background sync facility for tag registration.
    #[must_use]
    pub fn with_background(mut self, background: Arc<dyn BackgroundSyncRegistrar>) -> Self {
        self.background = background;
        self
    }

    /// Use a rejection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RejectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn partition(&self) -> Partition {
        self.partition
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub const fn policy(&self) -> RejectionPolicy {
        self.policy
    }

    pub(crate) fn remote(&self) -> &Arc<dyn RemoteApi> {
        &self.remote
    }

    pub(crate) const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    fn pending_read(&self) -> RwLockReadGuard<'_, Vec<PendingOperation>> {
        self.pending.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_write(&self) -> RwLockWriteGuard<'_, Vec<PendingOperation>> {
        self.pending.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build, persist and track a new operation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the operation is malformed or targets another
    /// partition, or the store error if the durable write fails. In both cases
    /// nothing was queued.
    pub async fn save_operation(
        &self,
        op_type: OperationType,
        endpoint: &str,
        payload: Option<Value>,
    ) -> Result<PendingOperation, StudySyncError> {
        let operation = PendingOperation::new(op_type, endpoint, payload, &self.user_id)?;
        self.enqueue(operation).await
    }

    /// Persist and track an already-built operation.
    ///
    /// The timestamp is raised to the newest queued one if the clock went
    /// backwards, so reload order matches queue order. Returns the operation
    /// as stored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the operation belongs to another partition or
    /// user, or the store error if the durable write fails.
    pub async fn enqueue(
        &self,
        mut operation: PendingOperation,
    ) -> Result<PendingOperation, StudySyncError> {
        if !self.partition.holds(operation.entity) {
            return Err(StudySyncError::InvalidInput(format!(
                "{} is not part of the {} queue",
                operation.endpoint, self.partition
            )));
        }
        if operation.user_id != self.user_id {
            return Err(StudySyncError::InvalidInput(format!(
                "operation {} belongs to another user",
                operation.id
            )));
        }

        let newest = self.pending_read().iter().map(|op| op.timestamp).max();
        if let Some(newest) = newest.filter(|newest| *newest > operation.timestamp) {
            debug!(id = %operation.id, "clock went backwards, keeping queue order");
            operation.timestamp = newest;
        }

        self.store.insert(self.partition, &operation).await?;
        info!(
            id = %operation.id,
            op = %operation.op_type,
            endpoint = %operation.endpoint,
            "operation queued"
        );
        self.pending_write().push(operation.clone());

        let tag = self.partition.sync_tag();
        if let Err(e) = self.background.register(tag).await {
            warn!(%tag, error = %e, "background sync registration failed");
        }

        Ok(operation)
    }

    /// Reload the active user's operations from the store, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the store error if the partition cannot be read.
    pub async fn load_pending_operations(&self) -> Result<usize, StudySyncError> {
        let mut operations: Vec<PendingOperation> = self
            .store
            .list(self.partition)
            .await?
            .into_iter()
            .filter(|op| op.user_id == self.user_id)
            .collect();

        // Stable: equal timestamps keep insertion order.
        operations.sort_by_key(|op| op.timestamp);

        let count = operations.len();
        *self.pending_write() = operations;
        debug!(partition = %self.partition, count, "pending operations loaded");
        Ok(count)
    }

    /// Replay queued operations in order.
    ///
    /// Does nothing while offline, when nothing is queued, or while another
    /// pass is running. A connectivity failure ends the pass; other failures
    /// leave the operation queued and move on.
    ///
    /// # Errors
    ///
    /// Returns the store error if a delete or attempt update fails, after the
    /// pass stops and the queue is reloaded, or if the reload itself fails.
    pub async fn sync_operations(&self) -> Result<SyncOutcome, StudySyncError> {
        if self.connectivity.is_offline() {
            debug!(partition = %self.partition, "sync skipped: offline");
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::Offline,
            });
        }
        if !self.has_pending() {
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::Empty,
            });
        }
        let Some(_guard) = PassGuard::acquire(&self.syncing) else {
            debug!(partition = %self.partition, "sync skipped: pass in progress");
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::AlreadySyncing,
            });
        };

        let operations = self.pending_operations();
        info!(partition = %self.partition, count = operations.len(), "sync pass started");

        let mut session = SyncSession::new(self.partition);
        let mut blocked: HashSet<String> = HashSet::new();
        let mut store_error = None;

        for operation in &operations {
            if operation.target_key().is_some_and(|key| blocked.contains(key)) {
                debug!(id = %operation.id, "skipping: earlier operation on target failed");
                session.record(operation, OperationOutcome::Skipped);
                continue;
            }

            let error = match self.remote.send(operation.to_request()).await {
                Ok(()) => match self.store.delete(self.partition, &operation.id).await {
                    Ok(_) => {
                        debug!(id = %operation.id, "operation synced");
                        session.record(operation, OperationOutcome::Synced);
                        continue;
                    },
                    Err(e) => {
                        // Delivered but still stored; the next pass resends it
                        // under the same idempotency key.
                        warn!(id = %operation.id, error = %e, "failed to remove synced operation");
                        session.record(
                            operation,
                            OperationOutcome::Failed {
                                class: e.failure_class(),
                                error: e.to_string(),
                            },
                        );
                        store_error = Some(e);
                        break;
                    },
                },
                Err(error) => error,
            };

            let class = error.failure_class();
            let message = error.to_string();
            warn!(id = %operation.id, %class, error = %message, "operation failed to sync");

            if let Some(key) = operation.target_key() {
                blocked.insert(key.to_string());
            }

            if class == FailureClass::Connectivity {
                session.record(operation, OperationOutcome::Failed { class, error: message });
                session.aborted_on_connectivity = true;
                self.connectivity.report(false);
                break;
            }

            if let Err(e) = self.settle_failure(operation, class, &message, &mut session).await {
                warn!(id = %operation.id, error = %e, "failed to record replay failure");
                store_error = Some(e);
                break;
            }
        }

        session.finish();
        self.last_failed
            .store(session.failed_count(), Ordering::Release);
        info!(
            partition = %self.partition,
            synced = session.synced_count(),
            failed = session.failed_count(),
            skipped = session.skipped_count(),
            "sync pass finished"
        );

        self.load_pending_operations().await?;
        match store_error {
            Some(e) => Err(e),
            None => Ok(SyncOutcome::Completed { session }),
        }
    }

    /// Count a failed replay against the operation, dead-lettering it when
    /// the policy says so.
    async fn settle_failure(
        &self,
        operation: &PendingOperation,
        class: FailureClass,
        message: &str,
        session: &mut SyncSession,
    ) -> Result<(), StudySyncError> {
        let attempts = self
            .store
            .record_failure(self.partition, &operation.id, message)
            .await?;

        if self.policy.should_dead_letter(class, attempts) {
            self.store.dead_letter(self.partition, &operation.id).await?;
            warn!(id = %operation.id, attempts, "operation moved to dead letters");
            session.record(
                operation,
                OperationOutcome::DeadLettered {
                    error: message.to_string(),
                },
            );
        } else {
            session.record(
                operation,
                OperationOutcome::Failed {
                    class,
                    error: message.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Snapshot of the in-memory queue, oldest first.
    #[must_use]
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.pending_read().clone()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_read().len()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending_read().is_empty()
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Failures in the most recent pass.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.last_failed.load(Ordering::Acquire)
    }

    /// Discard the active user's queued operations.
    ///
    /// # Errors
    ///
    /// Returns the store error if the delete fails.
    pub async fn discard_all(&self) -> Result<usize, StudySyncError> {
        let removed = self
            .store
            .clear(self.partition, Some(&self.user_id))
            .await?;
        self.pending_write().clear();
        info!(partition = %self.partition, removed, "queued operations discarded");
        Ok(removed)
    }

    /// The active user's dead letters.
    ///
    /// # Errors
    ///
    /// Returns the store error if the read fails.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StudySyncError> {
        Ok(self
            .store
            .list_dead_letters(self.partition)
            .await?
            .into_iter()
            .filter(|letter| letter.operation.user_id == self.user_id)
            .collect())
    }

    /// Move a dead letter back to the end of the queue.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user has no such dead letter.
    pub async fn requeue_dead_letter(&self, id: &str) -> Result<PendingOperation, StudySyncError> {
        self.own_dead_letter(id).await?;
        let operation = self
            .store
            .requeue_dead_letter(self.partition, id, Utc::now())
            .await?;
        info!(%id, "dead letter requeued");
        self.load_pending_operations().await?;
        Ok(operation)
    }

    /// Drop a dead letter.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user has no such dead letter.
    pub async fn discard_dead_letter(&self, id: &str) -> Result<(), StudySyncError> {
        self.own_dead_letter(id).await?;
        self.store.discard_dead_letter(self.partition, id).await?;
        info!(%id, "dead letter discarded");
        Ok(())
    }

    async fn own_dead_letter(&self, id: &str) -> Result<(), StudySyncError> {
        if self.dead_letters().await?.iter().any(|l| l.operation.id == id) {
            Ok(())
        } else {
            Err(StudySyncError::NotFound(format!("Dead letter {id}")))
        }
    }

    /// Store statistics for this partition.
    ///
    /// # Errors
    ///
    /// Returns the store error if the read fails.
    pub async fn stats(&self) -> Result<QueueStats, StudySyncError> {
        self.store.stats(self.partition).await
    }
}
