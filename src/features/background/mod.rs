//! Background sync facility.
//!
//! Queue managers register a tag per partition when they persist an
//! operation; the worker also registers any partition whose stored queue is
//! non-empty on reconnect and on each retry tick, which covers changes queued
//! by other processes. The [`BackgroundSyncWorker`] drains registered partitions
//! whenever the backend is reachable and announces each finished partition
//! through a [`CompletionNotifier`], independently of the reconnect
//! coordinator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StudySyncError;
use crate::features::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::features::sync::{OperationQueueManager, Partition, SkipReason, SyncOutcome};

const COMPLETION_CHANNEL_CAPACITY: usize = 16;

/// Announcement that a category finished a background pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackgroundSyncCompleted {
    /// Category label, e.g. `tasks`
    pub category: String,
}

/// Accepts deferred sync requests keyed by tag.
#[async_trait]
pub trait BackgroundSyncRegistrar: Send + Sync {
    /// Ask for a background pass for `tag`.
    async fn register(&self, tag: &str) -> Result<(), StudySyncError>;
}

/// Source of out-of-band completion messages.
pub trait CompletionNotifier: Send + Sync {
    /// Subscribe to completions. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<BackgroundSyncCompleted>;
}

/// Stand-in used where no worker is running.
#[derive(Debug, Clone)]
pub struct UnavailableBackgroundSync {
    completions: broadcast::Sender<BackgroundSyncCompleted>,
}

impl Default for UnavailableBackgroundSync {
    fn default() -> Self {
        let (completions, _) = broadcast::channel(1);
        Self { completions }
    }
}

#[async_trait]
impl BackgroundSyncRegistrar for UnavailableBackgroundSync {
    async fn register(&self, tag: &str) -> Result<(), StudySyncError> {
        Err(StudySyncError::BackgroundSync(format!(
            "no background worker to take {tag}"
        )))
    }
}

impl CompletionNotifier for UnavailableBackgroundSync {
    fn subscribe(&self) -> broadcast::Receiver<BackgroundSyncCompleted> {
        self.completions.subscribe()
    }
}

/// Handle for registering tags with a running [`BackgroundSyncWorker`].
#[derive(Debug, Clone)]
pub struct BackgroundSync {
    tags: mpsc::UnboundedSender<String>,
    completions: broadcast::Sender<BackgroundSyncCompleted>,
}

impl BackgroundSync {
    /// Create a handle and the worker it feeds.
    #[must_use]
    pub fn new(retry_interval: Duration) -> (Self, BackgroundSyncWorker) {
        let (tags, tag_rx) = mpsc::unbounded_channel();
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);

        let worker = BackgroundSyncWorker {
            tag_rx,
            completions: completions.clone(),
            retry_interval,
        };

        (Self { tags, completions }, worker)
    }
}

#[async_trait]
impl BackgroundSyncRegistrar for BackgroundSync {
    async fn register(&self, tag: &str) -> Result<(), StudySyncError> {
        if Partition::from_tag(tag).is_none() {
            return Err(StudySyncError::BackgroundSync(format!("unknown tag {tag}")));
        }
        self.tags
            .send(tag.to_string())
            .map_err(|_| StudySyncError::BackgroundSync("worker stopped".to_string()))
    }
}

impl CompletionNotifier for BackgroundSync {
    fn subscribe(&self) -> broadcast::Receiver<BackgroundSyncCompleted> {
        self.completions.subscribe()
    }
}

/// Register every partition with operations in the store.
///
/// Changes queued by other processes never reach this worker's tag channel.
async fn register_backlog(
    managers: &BTreeMap<Partition, Arc<OperationQueueManager>>,
    registered: &mut BTreeSet<Partition>,
) {
    for (partition, manager) in managers {
        match manager.load_pending_operations().await {
            Ok(0) => {},
            Ok(count) => {
                if registered.insert(*partition) {
                    debug!(%partition, count, "registered stored backlog");
                }
            },
            Err(e) => warn!(%partition, error = %e, "failed to read queued operations"),
        }
    }
}

/// Drains registered partitions while the backend is reachable.
pub struct BackgroundSyncWorker {
    tag_rx: mpsc::UnboundedReceiver<String>,
    completions: broadcast::Sender<BackgroundSyncCompleted>,
    retry_interval: Duration,
}

impl BackgroundSyncWorker {
    /// Run until `cancel` fires or every handle is dropped.
    pub async fn run(
        mut self,
        managers: Vec<Arc<OperationQueueManager>>,
        connectivity: ConnectivityMonitor,
        cancel: CancellationToken,
    ) {
        let managers: BTreeMap<Partition, Arc<OperationQueueManager>> = managers
            .into_iter()
            .map(|m| (m.partition(), m))
            .collect();
        let mut registered: BTreeSet<Partition> = BTreeSet::new();
        let mut events = connectivity.subscribe();
        let mut retry = tokio::time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                tag = self.tag_rx.recv() => {
                    let Some(tag) = tag else { break };
                    match Partition::from_tag(&tag) {
                        Some(partition) => {
                            debug!(%tag, "background sync registered");
                            registered.insert(partition);
                        },
                        None => warn!(%tag, "ignoring unknown background sync tag"),
                    }
                }
                event = events.recv() => {
                    if !matches!(event, Ok(ConnectivityEvent::Online) | Err(broadcast::error::RecvError::Lagged(_))) {
                        continue;
                    }
                    register_backlog(&managers, &mut registered).await;
                }
                _ = retry.tick() => register_backlog(&managers, &mut registered).await,
            }

            if connectivity.is_online() && !registered.is_empty() {
                self.drain(&managers, &mut registered).await;
            }
        }

        debug!("background sync worker stopped");
    }

    async fn drain(
        &self,
        managers: &BTreeMap<Partition, Arc<OperationQueueManager>>,
        registered: &mut BTreeSet<Partition>,
    ) {
        for partition in registered.clone() {
            let Some(manager) = managers.get(&partition) else {
                warn!(%partition, "no queue manager for registered partition");
                registered.remove(&partition);
                continue;
            };

            let outcome = match manager.load_pending_operations().await {
                Ok(_) => manager.sync_operations().await,
                Err(e) => Err(e),
            };

            let finished = match &outcome {
                Ok(SyncOutcome::Skipped {
                    reason: SkipReason::Offline | SkipReason::AlreadySyncing,
                }) => false,
                Ok(outcome) => !outcome.aborted_on_connectivity(),
                Err(e) => {
                    warn!(%partition, error = %e, "background sync pass failed");
                    false
                },
            };

            if finished {
                registered.remove(&partition);
                info!(category = partition.category(), "background sync completed");
                // Nobody listening is fine.
                let _ = self.completions.send(BackgroundSyncCompleted {
                    category: partition.category().to_string(),
                });
            }
        }
    }
}
