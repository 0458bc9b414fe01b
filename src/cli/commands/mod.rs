//! Command implementations for studysync.

mod completions;
mod entity;
mod sync;

pub use completions::completions;
pub use entity::entity;
pub use sync::sync;

use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::StudySyncError;
use crate::features::background::BackgroundSyncRegistrar;
use crate::features::connectivity::{ConnectivityMonitor, ConnectivityProbe, TcpProbe};
use crate::features::sync::{OperationQueueManager, Partition, QueueStore, SqliteQueueStore};
use crate::remote::{HttpRemoteApi, RemoteApi};

/// Shared state for one command invocation.
pub struct Context {
    pub config: Config,
    user: Option<String>,
    store: Arc<SqliteQueueStore>,
    remote: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
}

impl Context {
    /// Open the queue store and build the remote client.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the HTTP client
    /// cannot be built.
    pub fn new(config: Config, user: Option<String>) -> Result<Self, StudySyncError> {
        let store = Arc::new(SqliteQueueStore::open()?);
        let remote: Arc<dyn RemoteApi> = Arc::new(HttpRemoteApi::new(&config.api)?);
        let user = user.or_else(|| config.general.user_id.clone());

        Ok(Self {
            config,
            user,
            store,
            remote,
            connectivity: ConnectivityMonitor::new(false),
        })
    }

    /// Seed the connectivity state, probing the backend unless forced offline.
    pub async fn detect_connectivity(&self, force_offline: bool) {
        if force_offline {
            debug!("connectivity forced offline");
            return;
        }

        let timeout = self.config.connectivity.probe_timeout();
        let online = match TcpProbe::from_base_url(&self.config.api.base_url, timeout) {
            Ok(probe) => probe.probe().await,
            Err(e) => {
                debug!(error = %e, "cannot probe backend");
                false
            },
        };
        self.connectivity.report(online);
    }

    #[must_use]
    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    #[must_use]
    pub fn store(&self) -> &SqliteQueueStore {
        &self.store
    }

    /// The active user.
    ///
    /// # Errors
    ///
    /// Returns `Config` when no user was given.
    pub fn user(&self) -> Result<&str, StudySyncError> {
        self.user.as_deref().ok_or_else(|| {
            StudySyncError::Config(
                "No active user. Pass --user, set STUDYSYNC_USER or general.user_id".to_string(),
            )
        })
    }

    /// Build a loaded queue manager for a partition.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active user or the queue cannot be read.
    pub async fn manager(
        &self,
        partition: Partition,
        background: Option<Arc<dyn BackgroundSyncRegistrar>>,
    ) -> Result<Arc<OperationQueueManager>, StudySyncError> {
        let store: Arc<dyn QueueStore> = self.store.clone();
        let mut manager = OperationQueueManager::new(
            partition,
            self.user()?,
            store,
            Arc::clone(&self.remote),
            self.connectivity.clone(),
        )
        .with_policy(self.config.sync.rejection_policy());

        if let Some(background) = background {
            manager = manager.with_background(background);
        }

        manager.load_pending_operations().await?;
        Ok(Arc::new(manager))
    }

    /// Loaded managers for the given partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if any manager cannot be built.
    pub async fn managers(
        &self,
        partitions: &[Partition],
        background: Option<Arc<dyn BackgroundSyncRegistrar>>,
    ) -> Result<Vec<Arc<OperationQueueManager>>, StudySyncError> {
        let mut managers = Vec::with_capacity(partitions.len());
        for partition in partitions {
            managers.push(self.manager(*partition, background.clone()).await?);
        }
        Ok(managers)
    }
}

/// Resolve an optional `--partition` argument.
///
/// # Errors
///
/// Returns `InvalidInput` for unknown partition names.
pub fn partitions(arg: Option<&str>) -> Result<Vec<Partition>, StudySyncError> {
    match arg {
        Some(name) => Ok(vec![name.parse()?]),
        None => Ok(Partition::ALL.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitions_arg() {
        assert_eq!(partitions(None).unwrap(), Partition::ALL.to_vec());
        assert_eq!(partitions(Some("teacher")).unwrap(), vec![Partition::Courses]);
        assert!(partitions(Some("grades")).is_err());
    }
}
