//! Test doubles for queue collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::store::{DeadLetter, QueueStats, QueueStore, SqliteQueueStore};
use super::{PendingOperation, Partition};
use crate::error::StudySyncError;
use crate::features::background::BackgroundSyncRegistrar;
use crate::remote::{ApiRequest, RemoteApi};
use crate::storage::Database;

/// Fresh in-memory SQLite store.
pub fn memory_store() -> Arc<dyn QueueStore> {
    Arc::new(SqliteQueueStore::with_database(
        Database::open_in_memory().unwrap(),
    ))
}

/// Scripted failure for one call.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Connectivity,
    Status(u16),
}

impl Failure {
    fn into_error(self) -> StudySyncError {
        match self {
            Self::Connectivity => StudySyncError::Network("connection refused".to_string()),
            Self::Status(status) => StudySyncError::http(status, "scripted failure"),
        }
    }
}

/// Remote that records calls and fails on request.
#[derive(Default)]
pub struct ScriptedRemote {
    calls: Mutex<Vec<ApiRequest>>,
    failures: Mutex<HashMap<String, VecDeque<Failure>>>,
    always_fail: Mutex<HashMap<String, Failure>>,
    gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
}

impl ScriptedRemote {
    /// A remote whose calls wait on `gate` before answering.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Fail the next call to `endpoint` once.
    pub fn fail_once(&self, endpoint: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Fail every call to `endpoint`.
    pub fn fail_always(&self, endpoint: &str, failure: Failure) {
        self.always_fail
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), failure);
    }

    /// Requests received so far, in order.
    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Notified each time a call starts.
    pub fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn send(&self, request: ApiRequest) -> Result<(), StudySyncError> {
        self.calls.lock().unwrap().push(request.clone());
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&request.endpoint)
            .and_then(VecDeque::pop_front);
        let failure =
            scripted.or_else(|| self.always_fail.lock().unwrap().get(&request.endpoint).copied());

        match failure {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

/// Store whose writes always fail, as with a full disk.
pub struct FailingStore;

fn quota() -> StudySyncError {
    StudySyncError::Database("database or disk is full".to_string())
}

#[async_trait]
impl QueueStore for FailingStore {
    async fn insert(&self, _: Partition, _: &PendingOperation) -> Result<(), StudySyncError> {
        Err(quota())
    }

    async fn list(&self, _: Partition) -> Result<Vec<PendingOperation>, StudySyncError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _: Partition, _: &str) -> Result<bool, StudySyncError> {
        Err(quota())
    }

    async fn record_failure(&self, _: Partition, _: &str, _: &str) -> Result<u32, StudySyncError> {
        Err(quota())
    }

    async fn dead_letter(&self, _: Partition, _: &str) -> Result<(), StudySyncError> {
        Err(quota())
    }

    async fn list_dead_letters(&self, _: Partition) -> Result<Vec<DeadLetter>, StudySyncError> {
        Ok(Vec::new())
    }

    async fn requeue_dead_letter(
        &self,
        _: Partition,
        id: &str,
        _: DateTime<Utc>,
    ) -> Result<PendingOperation, StudySyncError> {
        Err(StudySyncError::NotFound(id.to_string()))
    }

    async fn discard_dead_letter(&self, _: Partition, _: &str) -> Result<bool, StudySyncError> {
        Ok(false)
    }

    async fn clear(&self, _: Partition, _: Option<&str>) -> Result<usize, StudySyncError> {
        Err(quota())
    }

    async fn stats(&self, _: Partition) -> Result<QueueStats, StudySyncError> {
        Ok(QueueStats::default())
    }
}

/// Store that allows a number of deletes, then fails them.
pub struct DeleteFailingStore {
    inner: Arc<dyn QueueStore>,
    deletes_left: AtomicUsize,
}

impl DeleteFailingStore {
    pub fn new(inner: Arc<dyn QueueStore>, deletes: usize) -> Self {
        Self {
            inner,
            deletes_left: AtomicUsize::new(deletes),
        }
    }
}

#[async_trait]
impl QueueStore for DeleteFailingStore {
    async fn insert(&self, partition: Partition, op: &PendingOperation) -> Result<(), StudySyncError> {
        self.inner.insert(partition, op).await
    }

    async fn list(&self, partition: Partition) -> Result<Vec<PendingOperation>, StudySyncError> {
        self.inner.list(partition).await
    }

    async fn delete(&self, partition: Partition, id: &str) -> Result<bool, StudySyncError> {
        let allowed = self
            .deletes_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if allowed {
            self.inner.delete(partition, id).await
        } else {
            Err(StudySyncError::Database("disk I/O error".to_string()))
        }
    }

    async fn record_failure(
        &self,
        partition: Partition,
        id: &str,
        error: &str,
    ) -> Result<u32, StudySyncError> {
        self.inner.record_failure(partition, id, error).await
    }

    async fn dead_letter(&self, partition: Partition, id: &str) -> Result<(), StudySyncError> {
        self.inner.dead_letter(partition, id).await
    }

    async fn list_dead_letters(&self, partition: Partition) -> Result<Vec<DeadLetter>, StudySyncError> {
        self.inner.list_dead_letters(partition).await
    }

    async fn requeue_dead_letter(
        &self,
        partition: Partition,
        id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PendingOperation, StudySyncError> {
        self.inner.requeue_dead_letter(partition, id, timestamp).await
    }

    async fn discard_dead_letter(&self, partition: Partition, id: &str) -> Result<bool, StudySyncError> {
        self.inner.discard_dead_letter(partition, id).await
    }

    async fn clear(&self, partition: Partition, user: Option<&str>) -> Result<usize, StudySyncError> {
        self.inner.clear(partition, user).await
    }

    async fn stats(&self, partition: Partition) -> Result<QueueStats, StudySyncError> {
        self.inner.stats(partition).await
    }
}

/// Registrar that remembers tags.
#[derive(Default)]
pub struct RecordingRegistrar {
    tags: Mutex<Vec<String>>,
}

impl RecordingRegistrar {
    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackgroundSyncRegistrar for RecordingRegistrar {
    async fn register(&self, tag: &str) -> Result<(), StudySyncError> {
        self.tags.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}
