//! Reconnect sync coordinator.
//!
//! Watches connectivity transitions and decides when queued operations are
//! replayed. A cycle starts on an offline to online transition, runs one pass
//! per partition, and ends at the first completion signal per partition: the
//! pass result or a background-sync completion. If neither arrives within the
//! completion window the status is cleared anyway; the passes keep running.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manager::{OperationQueueManager, PassGuard};
use super::operation::Partition;
use super::session::{SkipReason, SyncOutcome};
use super::status::SyncStatus;
use crate::error::StudySyncError;
use crate::features::background::CompletionNotifier;
use crate::features::connectivity::{ConnectivityEvent, ConnectivityMonitor};

/// What happens when the backend becomes reachable again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// Start syncing immediately.
    #[default]
    Automatic,
    /// Ask first; [`ReconnectSyncCoordinator::confirm_sync`] starts the cycle.
    Prompt,
}

/// Per-partition result of a cycle.
type PassResult = (Partition, Result<SyncOutcome, StudySyncError>);

/// Drives replay on reconnect and publishes [`SyncStatus`].
pub struct ReconnectSyncCoordinator {
    managers: Vec<Arc<OperationQueueManager>>,
    connectivity: ConnectivityMonitor,
    notifier: Arc<dyn CompletionNotifier>,
    mode: ReconnectMode,
    completion_wait: Duration,
    was_offline: AtomicBool,
    awaiting_confirmation: AtomicBool,
    cycle_active: AtomicBool,
    status: watch::Sender<SyncStatus>,
}

impl ReconnectSyncCoordinator {
    #[must_use]
    pub fn new(
        managers: Vec<Arc<OperationQueueManager>>,
        connectivity: ConnectivityMonitor,
        notifier: Arc<dyn CompletionNotifier>,
        mode: ReconnectMode,
        completion_wait: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            managers,
            connectivity,
            notifier,
            mode,
            completion_wait,
            was_offline: AtomicBool::new(false),
            awaiting_confirmation: AtomicBool::new(false),
            cycle_active: AtomicBool::new(false),
            status,
        }
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn current_status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn was_offline(&self) -> bool {
        self.was_offline.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation.load(Ordering::Acquire)
    }

    fn publish(&self, status: SyncStatus) {
        debug!(%status, "sync status");
        self.status.send_replace(status);
    }

    /// Queued operations across all partitions, reloaded from the store.
    async fn queued(&self) -> usize {
        let mut total = 0;
        for manager in &self.managers {
            match manager.load_pending_operations().await {
                Ok(count) => total += count,
                Err(e) => {
                    warn!(partition = %manager.partition(), error = %e, "failed to load queue");
                    total += manager.pending_count();
                },
            }
        }
        total
    }

    /// Handle transitions until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut events = self.connectivity.subscribe();

        if self.connectivity.is_offline() {
            self.handle_offline().await;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(ConnectivityEvent::Offline) => self.handle_offline().await,
                    Ok(ConnectivityEvent::Online) => self.handle_online().await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed connectivity events");
                        if self.connectivity.is_online() {
                            self.handle_online().await;
                        } else {
                            self.handle_offline().await;
                        }
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!("reconnect coordinator stopped");
    }

    /// Record that the backend is unreachable.
    pub async fn handle_offline(&self) {
        self.was_offline.store(true, Ordering::Release);
        self.awaiting_confirmation.store(false, Ordering::Release);
        let queued = self.queued().await;
        self.publish(SyncStatus::Offline { queued });
    }

    /// React to the backend becoming reachable.
    pub async fn handle_online(&self) {
        if !self.was_offline() {
            return;
        }

        let queued = self.queued().await;
        if queued == 0 {
            self.was_offline.store(false, Ordering::Release);
            self.publish(SyncStatus::Idle);
            return;
        }

        match self.mode {
            ReconnectMode::Automatic => {
                self.run_cycle().await;
            },
            ReconnectMode::Prompt => {
                self.awaiting_confirmation.store(true, Ordering::Release);
                self.publish(SyncStatus::AwaitingConfirmation { queued });
            },
        }
    }

    /// Accept a pending reconnect prompt.
    ///
    /// Returns `false` if there was no prompt or the backend went away again.
    pub async fn confirm_sync(&self) -> bool {
        if !self.awaiting_confirmation.swap(false, Ordering::AcqRel) {
            return false;
        }
        if self.connectivity.is_offline() {
            let queued = self.queued().await;
            self.publish(SyncStatus::Offline { queued });
            return false;
        }
        self.run_cycle().await
    }

    /// Manual retry. Refused while offline or while a cycle is running.
    pub async fn sync_now(&self) -> bool {
        if self.connectivity.is_offline() {
            let queued = self.queued().await;
            self.publish(SyncStatus::Offline { queued });
            return false;
        }
        self.awaiting_confirmation.store(false, Ordering::Release);
        self.run_cycle().await
    }

    /// Run one cycle. Returns `false` if another cycle was already active.
    async fn run_cycle(&self) -> bool {
        let Some(_guard) = PassGuard::acquire(&self.cycle_active) else {
            debug!("sync cycle already active");
            return false;
        };

        self.publish(SyncStatus::Syncing);
        info!(partitions = self.managers.len(), "sync cycle started");

        // Subscribe before spawning so no completion is missed.
        let mut completions = self.notifier.subscribe();
        let mut notifier_open = true;
        let mut outstanding: BTreeSet<Partition> =
            self.managers.iter().map(|m| m.partition()).collect();

        let mut passes: FuturesUnordered<_> = self
            .managers
            .iter()
            .map(|manager| {
                let manager = Arc::clone(manager);
                let partition = manager.partition();
                let handle = tokio::spawn(async move {
                    manager.load_pending_operations().await?;
                    manager.sync_operations().await
                });
                async move {
                    let result = handle.await.unwrap_or_else(|e| {
                        Err(StudySyncError::BackgroundSync(format!("sync pass panicked: {e}")))
                    });
                    (partition, result)
                }
            })
            .collect();

        let deadline = tokio::time::sleep(self.completion_wait);
        tokio::pin!(deadline);

        let mut failed = 0usize;
        let mut errors: Vec<String> = Vec::new();
        let mut timed_out = false;

        while !outstanding.is_empty() {
            tokio::select! {
                Some(result) = passes.next() => {
                    let (partition, result): PassResult = result;
                    match result {
                        // Another pass owns the partition; its completion or
                        // the deadline ends the wait.
                        Ok(SyncOutcome::Skipped { reason: SkipReason::AlreadySyncing }) => {
                            debug!(%partition, "pass already running, waiting for completion");
                            continue;
                        },
                        Ok(SyncOutcome::Skipped { reason: SkipReason::Offline }) => {
                            errors.push(format!("{partition}: backend unreachable"));
                        },
                        Ok(outcome) => {
                            failed += outcome.failed_count();
                            if outcome.aborted_on_connectivity() {
                                errors.push(format!("{partition}: backend unreachable"));
                            }
                        },
                        Err(e) => {
                            error!(%partition, error = %e, "sync pass failed");
                            errors.push(format!("{partition}: {e}"));
                        },
                    }
                    outstanding.remove(&partition);
                }
                message = completions.recv(), if notifier_open => match message {
                    Ok(done) => match Partition::from_category(&done.category) {
                        Some(partition) => {
                            debug!(category = %done.category, "background sync completion received");
                            outstanding.remove(&partition);
                        },
                        None => warn!(category = %done.category, "unknown completion category"),
                    },
                    Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => notifier_open = false,
                },
                () = &mut deadline => {
                    warn!(outstanding = outstanding.len(), "no completion signal, clearing sync status");
                    timed_out = true;
                    break;
                }
            }
        }

        if !errors.is_empty() {
            // Keep was_offline so the next reconnect retries.
            self.publish(SyncStatus::Error {
                message: errors.join("; "),
            });
            return true;
        }

        self.was_offline.store(false, Ordering::Release);
        info!(failed, timed_out, "sync cycle finished");

        if failed > 0 {
            self.publish(SyncStatus::Failed { failed });
        } else {
            self.publish(SyncStatus::Synced);
        }
        true
    }
}
