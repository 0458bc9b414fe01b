//! Queue store: durable, partitioned storage for pending operations.
//!
//! Records are keyed by operation id and scoped by [`Partition`]. Only the
//! queue manager for a partition writes to that partition.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::operation::{EntityKind, OperationType, PendingOperation, Partition};
use crate::error::StudySyncError;
use crate::storage::Database;

/// An operation removed from the live queue by the rejection policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub operation: PendingOperation,
    pub failed_at: DateTime<Utc>,
}

/// Queue store statistics for one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Operations waiting to be replayed
    pub pending: usize,
    /// Operations in the dead-letter partition
    pub dead_letters: usize,
    /// Ids recorded in the synced ledger
    pub synced: usize,
    /// Oldest pending operation timestamp
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Persistent, partitioned record store for queued operations.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new operation.
    async fn insert(&self, partition: Partition, operation: &PendingOperation)
        -> Result<(), StudySyncError>;

    /// All records in a partition, in insertion order.
    async fn list(&self, partition: Partition) -> Result<Vec<PendingOperation>, StudySyncError>;

    /// Remove a record after a successful replay.
    ///
    /// Returns `false` when no record had that id.
    async fn delete(&self, partition: Partition, id: &str) -> Result<bool, StudySyncError>;

    /// Record a failed replay and return the new attempt count.
    async fn record_failure(
        &self,
        partition: Partition,
        id: &str,
        error: &str,
    ) -> Result<u32, StudySyncError>;

    /// Move a record to the dead-letter partition.
    async fn dead_letter(&self, partition: Partition, id: &str) -> Result<(), StudySyncError>;

    /// Dead letters for a partition, oldest first.
    async fn list_dead_letters(&self, partition: Partition)
        -> Result<Vec<DeadLetter>, StudySyncError>;

    /// Move a dead letter back into the live queue, stamped with `timestamp`.
    async fn requeue_dead_letter(
        &self,
        partition: Partition,
        id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PendingOperation, StudySyncError>;

    /// Drop a dead letter for good.
    async fn discard_dead_letter(&self, partition: Partition, id: &str)
        -> Result<bool, StudySyncError>;

    /// Discard queued records, optionally for one user only.
    async fn clear(&self, partition: Partition, user_id: Option<&str>)
        -> Result<usize, StudySyncError>;

    /// Partition statistics.
    async fn stats(&self, partition: Partition) -> Result<QueueStats, StudySyncError>;
}

/// Queue store backed by the local SQLite database.
pub struct SqliteQueueStore {
    db: Mutex<Database>,
}

const OPERATION_COLUMNS: &str =
    "id, entity, op_type, endpoint, payload, timestamp, user_id, attempts, last_error";

impl SqliteQueueStore {
    /// Open the store at the default database location.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open() -> Result<Self, StudySyncError> {
        Ok(Self::with_database(Database::open()?))
    }

    /// Create a store with an existing database connection.
    #[must_use]
    pub const fn with_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, StudySyncError> {
        self.db
            .lock()
            .map_err(|_| StudySyncError::Database("Queue store lock poisoned".to_string()))
    }

    /// Delete ledger entries older than the specified age.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn prune_synced(&self, max_age_hours: i64) -> Result<usize, StudySyncError> {
        let db = self.db()?;
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);

        db.connection()
            .execute(
                "DELETE FROM synced_operations WHERE synced_at < ?1",
                [cutoff.timestamp_millis()],
            )
            .map_err(|e| StudySyncError::Database(format!("Failed to prune synced ids: {e}")))
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(
        &self,
        partition: Partition,
        operation: &PendingOperation,
    ) -> Result<(), StudySyncError> {
        if !partition.holds(operation.entity) {
            return Err(StudySyncError::InvalidInput(format!(
                "{} operation does not belong to the {partition} partition",
                operation.entity
            )));
        }

        let db = self.db()?;
        let conn = db.connection();

        let already_synced: Option<String> = conn
            .query_row(
                "SELECT id FROM synced_operations WHERE id = ?1",
                [&operation.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StudySyncError::Database(format!("Failed to check synced ids: {e}")))?;

        if already_synced.is_some() {
            return Err(StudySyncError::InvalidInput(format!(
                "Operation {} was already synced",
                operation.id
            )));
        }

        let payload = operation
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r"INSERT INTO pending_operations
              (id, partition, entity, op_type, endpoint, payload, timestamp, user_id, attempts, last_error)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                operation.id,
                partition.as_str(),
                operation.entity.as_str(),
                operation.op_type.as_str(),
                operation.endpoint,
                payload,
                operation.timestamp.timestamp_millis(),
                operation.user_id,
                operation.attempts,
                operation.last_error,
            ],
        )
        .map_err(|e| StudySyncError::Database(format!("Failed to enqueue operation: {e}")))?;

        Ok(())
    }

    async fn list(&self, partition: Partition) -> Result<Vec<PendingOperation>, StudySyncError> {
        let db = self.db()?;
        let mut stmt = db
            .connection()
            .prepare(&format!(
                "SELECT {OPERATION_COLUMNS} FROM pending_operations WHERE partition = ?1 ORDER BY seq ASC"
            ))
            .map_err(|e| StudySyncError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([partition.as_str()], row_to_operation)
            .map_err(|e| StudySyncError::Database(format!("Failed to list operations: {e}")))?;

        let mut operations = Vec::new();
        for row in rows {
            operations.push(row.map_err(|e| StudySyncError::Database(e.to_string()))?);
        }

        Ok(operations)
    }

    async fn delete(&self, partition: Partition, id: &str) -> Result<bool, StudySyncError> {
        let db = self.db()?;
        let tx = db
            .connection()
            .unchecked_transaction()
            .map_err(|e| StudySyncError::Database(format!("Failed to begin transaction: {e}")))?;

        let rows = tx
            .execute(
                "DELETE FROM pending_operations WHERE partition = ?1 AND id = ?2",
                params![partition.as_str(), id],
            )
            .map_err(|e| StudySyncError::Database(format!("Failed to delete operation: {e}")))?;

        if rows > 0 {
            tx.execute(
                "INSERT OR REPLACE INTO synced_operations (id, partition, synced_at) VALUES (?1, ?2, ?3)",
                params![id, partition.as_str(), Utc::now().timestamp_millis()],
            )
            .map_err(|e| StudySyncError::Database(format!("Failed to record synced id: {e}")))?;
        }

        tx.commit()
            .map_err(|e| StudySyncError::Database(format!("Failed to commit delete: {e}")))?;

        Ok(rows > 0)
    }

    async fn record_failure(
        &self,
        partition: Partition,
        id: &str,
        error: &str,
    ) -> Result<u32, StudySyncError> {
        let db = self.db()?;
        let conn = db.connection();

        conn.execute(
            r"UPDATE pending_operations SET
              attempts = attempts + 1,
              last_error = ?1
              WHERE partition = ?2 AND id = ?3",
            params![error, partition.as_str(), id],
        )
        .map_err(|e| StudySyncError::Database(format!("Failed to record attempt: {e}")))?;

        conn.query_row(
            "SELECT attempts FROM pending_operations WHERE partition = ?1 AND id = ?2",
            params![partition.as_str(), id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StudySyncError::Database(format!("Failed to read attempts: {e}")))?
        .ok_or_else(|| StudySyncError::NotFound(format!("Operation {id}")))
    }

    async fn dead_letter(&self, partition: Partition, id: &str) -> Result<(), StudySyncError> {
        let db = self.db()?;
        let tx = db
            .connection()
            .unchecked_transaction()
            .map_err(|e| StudySyncError::Database(format!("Failed to begin transaction: {e}")))?;

        let moved = tx
            .execute(
                r"INSERT INTO dead_letters
                  (id, partition, entity, op_type, endpoint, payload, timestamp, user_id, attempts, last_error, failed_at)
                  SELECT id, partition, entity, op_type, endpoint, payload, timestamp, user_id, attempts, last_error, ?1
                  FROM pending_operations WHERE partition = ?2 AND id = ?3",
                params![Utc::now().timestamp_millis(), partition.as_str(), id],
            )
            .map_err(|e| StudySyncError::Database(format!("Failed to dead-letter operation: {e}")))?;

        if moved == 0 {
            return Err(StudySyncError::NotFound(format!("Operation {id}")));
        }

        tx.execute(
            "DELETE FROM pending_operations WHERE partition = ?1 AND id = ?2",
            params![partition.as_str(), id],
        )
        .map_err(|e| StudySyncError::Database(format!("Failed to delete operation: {e}")))?;

        tx.commit()
            .map_err(|e| StudySyncError::Database(format!("Failed to commit dead letter: {e}")))
    }

    async fn list_dead_letters(
        &self,
        partition: Partition,
    ) -> Result<Vec<DeadLetter>, StudySyncError> {
        let db = self.db()?;
        let mut stmt = db
            .connection()
            .prepare(&format!(
                "SELECT {OPERATION_COLUMNS}, failed_at FROM dead_letters WHERE partition = ?1 ORDER BY failed_at ASC"
            ))
            .map_err(|e| StudySyncError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([partition.as_str()], |row| {
                Ok(DeadLetter {
                    operation: row_to_operation(row)?,
                    failed_at: millis_to_datetime(row.get(9)?),
                })
            })
            .map_err(|e| StudySyncError::Database(format!("Failed to list dead letters: {e}")))?;

        let mut letters = Vec::new();
        for row in rows {
            letters.push(row.map_err(|e| StudySyncError::Database(e.to_string()))?);
        }

        Ok(letters)
    }

    async fn requeue_dead_letter(
        &self,
        partition: Partition,
        id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PendingOperation, StudySyncError> {
        let db = self.db()?;
        let tx = db
            .connection()
            .unchecked_transaction()
            .map_err(|e| StudySyncError::Database(format!("Failed to begin transaction: {e}")))?;

        let mut operation = tx
            .query_row(
                &format!(
                    "SELECT {OPERATION_COLUMNS} FROM dead_letters WHERE partition = ?1 AND id = ?2"
                ),
                params![partition.as_str(), id],
                row_to_operation,
            )
            .optional()
            .map_err(|e| StudySyncError::Database(format!("Failed to read dead letter: {e}")))?
            .ok_or_else(|| StudySyncError::NotFound(format!("Dead letter {id}")))?;

        operation.timestamp = timestamp;
        operation.attempts = 0;
        operation.last_error = None;

        let payload = operation
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        tx.execute(
            r"INSERT INTO pending_operations
              (id, partition, entity, op_type, endpoint, payload, timestamp, user_id, attempts, last_error)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL)",
            params![
                operation.id,
                partition.as_str(),
                operation.entity.as_str(),
                operation.op_type.as_str(),
                operation.endpoint,
                payload,
                operation.timestamp.timestamp_millis(),
                operation.user_id,
            ],
        )
        .map_err(|e| StudySyncError::Database(format!("Failed to requeue operation: {e}")))?;

        tx.execute(
            "DELETE FROM dead_letters WHERE partition = ?1 AND id = ?2",
            params![partition.as_str(), id],
        )
        .map_err(|e| StudySyncError::Database(format!("Failed to delete dead letter: {e}")))?;

        tx.commit()
            .map_err(|e| StudySyncError::Database(format!("Failed to commit requeue: {e}")))?;

        Ok(operation)
    }

    async fn discard_dead_letter(
        &self,
        partition: Partition,
        id: &str,
    ) -> Result<bool, StudySyncError> {
        let db = self.db()?;
        let rows = db
            .connection()
            .execute(
                "DELETE FROM dead_letters WHERE partition = ?1 AND id = ?2",
                params![partition.as_str(), id],
            )
            .map_err(|e| StudySyncError::Database(format!("Failed to discard dead letter: {e}")))?;

        Ok(rows > 0)
    }

    async fn clear(
        &self,
        partition: Partition,
        user_id: Option<&str>,
    ) -> Result<usize, StudySyncError> {
        let db = self.db()?;
        let conn = db.connection();

        let rows = match user_id {
            Some(user) => conn.execute(
                "DELETE FROM pending_operations WHERE partition = ?1 AND user_id = ?2",
                params![partition.as_str(), user],
            ),
            None => conn.execute(
                "DELETE FROM pending_operations WHERE partition = ?1",
                [partition.as_str()],
            ),
        }
        .map_err(|e| StudySyncError::Database(format!("Failed to clear queue: {e}")))?;

        Ok(rows)
    }

    async fn stats(&self, partition: Partition) -> Result<QueueStats, StudySyncError> {
        let db = self.db()?;
        let conn = db.connection();

        let count = |sql: &str| -> Result<usize, StudySyncError> {
            conn.query_row(sql, [partition.as_str()], |row| row.get::<_, i64>(0))
                .map(|n| usize::try_from(n).unwrap_or_default())
                .map_err(|e| StudySyncError::Database(format!("Failed to count records: {e}")))
        };

        let pending = count("SELECT COUNT(*) FROM pending_operations WHERE partition = ?1")?;
        let dead_letters = count("SELECT COUNT(*) FROM dead_letters WHERE partition = ?1")?;
        let synced = count("SELECT COUNT(*) FROM synced_operations WHERE partition = ?1")?;

        let oldest_pending: Option<i64> = conn
            .query_row(
                "SELECT MIN(timestamp) FROM pending_operations WHERE partition = ?1",
                [partition.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| StudySyncError::Database(format!("Failed to get oldest pending: {e}")))?;

        Ok(QueueStats {
            pending,
            dead_letters,
            synced,
            oldest_pending: oldest_pending.map(millis_to_datetime),
        })
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn row_to_operation(row: &Row<'_>) -> Result<PendingOperation, rusqlite::Error> {
    let id: String = row.get(0)?;
    let entity_str: String = row.get(1)?;
    let op_type_str: String = row.get(2)?;
    let endpoint: String = row.get(3)?;
    let payload_str: Option<String> = row.get(4)?;
    let timestamp: i64 = row.get(5)?;
    let user_id: String = row.get(6)?;
    let attempts: u32 = row.get(7)?;
    let last_error: Option<String> = row.get(8)?;

    let conversion = |idx: usize, e: StudySyncError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };

    let entity: EntityKind = entity_str.parse().map_err(|e| conversion(1, e))?;
    let op_type: OperationType = op_type_str.parse().map_err(|e| conversion(2, e))?;
    let payload = payload_str
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| conversion(4, StudySyncError::Parse(e)))?;

    Ok(PendingOperation {
        id,
        op_type,
        endpoint,
        payload,
        timestamp: millis_to_datetime(timestamp),
        user_id,
        entity,
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_store() -> SqliteQueueStore {
        SqliteQueueStore::with_database(Database::open_in_memory().unwrap())
    }

    fn delete_task(id: &str) -> PendingOperation {
        PendingOperation::new(OperationType::Delete, &format!("/tasks/{id}"), None, "alice").unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let store = create_test_store();

        let create =
            PendingOperation::new(OperationType::Create, "/tasks", Some(json!({"name": "X"})), "alice")
                .unwrap();
        store.insert(Partition::Tasks, &create).await.unwrap();
        store.insert(Partition::Tasks, &delete_task("9")).await.unwrap();

        let listed = store.list(Partition::Tasks).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], create);
        assert_eq!(listed[1].op_type, OperationType::Delete);
        assert!(listed[1].payload.is_none());

        assert!(store.list(Partition::Routines).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_wrong_partition_rejected() {
        let store = create_test_store();
        let err = store
            .insert(Partition::Routines, &delete_task("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StudySyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_records_synced_id() {
        let store = create_test_store();
        let op = delete_task("1");
        store.insert(Partition::Tasks, &op).await.unwrap();

        assert!(store.delete(Partition::Tasks, &op.id).await.unwrap());
        assert!(!store.delete(Partition::Tasks, &op.id).await.unwrap());

        // A synced id can never be queued again.
        let err = store.insert(Partition::Tasks, &op).await.unwrap_err();
        assert!(matches!(err, StudySyncError::InvalidInput(_)));

        let stats = store.stats(Partition::Tasks).await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.synced, 1);
    }

    #[tokio::test]
    async fn test_record_failure_increments_attempts() {
        let store = create_test_store();
        let op = delete_task("2");
        store.insert(Partition::Tasks, &op).await.unwrap();

        assert_eq!(store.record_failure(Partition::Tasks, &op.id, "HTTP 422").await.unwrap(), 1);
        assert_eq!(store.record_failure(Partition::Tasks, &op.id, "HTTP 422").await.unwrap(), 2);

        let listed = store.list(Partition::Tasks).await.unwrap();
        assert_eq!(listed[0].attempts, 2);
        assert_eq!(listed[0].last_error.as_deref(), Some("HTTP 422"));

        let missing = store.record_failure(Partition::Tasks, "nope", "x").await;
        assert!(matches!(missing, Err(StudySyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dead_letter_lifecycle() {
        let store = create_test_store();
        let op = delete_task("3");
        store.insert(Partition::Tasks, &op).await.unwrap();
        store.record_failure(Partition::Tasks, &op.id, "HTTP 404").await.unwrap();

        store.dead_letter(Partition::Tasks, &op.id).await.unwrap();
        assert!(store.list(Partition::Tasks).await.unwrap().is_empty());

        let letters = store.list_dead_letters(Partition::Tasks).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].operation.attempts, 1);

        let requeued = store
            .requeue_dead_letter(Partition::Tasks, &op.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(requeued.id, op.id);
        assert_eq!(requeued.attempts, 0);
        assert!(store.list_dead_letters(Partition::Tasks).await.unwrap().is_empty());
        assert_eq!(store.list(Partition::Tasks).await.unwrap().len(), 1);

        store.dead_letter(Partition::Tasks, &op.id).await.unwrap();
        assert!(store.discard_dead_letter(Partition::Tasks, &op.id).await.unwrap());
        assert_eq!(store.stats(Partition::Tasks).await.unwrap().dead_letters, 0);
    }

    #[tokio::test]
    async fn test_clear_scoped_to_user() {
        let store = create_test_store();
        store.insert(Partition::Tasks, &delete_task("1")).await.unwrap();
        let bob = PendingOperation::new(OperationType::Delete, "/tasks/2", None, "bob").unwrap();
        store.insert(Partition::Tasks, &bob).await.unwrap();

        assert_eq!(store.clear(Partition::Tasks, Some("alice")).await.unwrap(), 1);
        let remaining = store.list(Partition::Tasks).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_id, "bob");
    }

    #[tokio::test]
    async fn test_prune_synced() {
        let store = create_test_store();
        let op = delete_task("4");
        store.insert(Partition::Tasks, &op).await.unwrap();
        store.delete(Partition::Tasks, &op.id).await.unwrap();

        assert_eq!(store.prune_synced(24).unwrap(), 0);
        assert_eq!(store.prune_synced(-1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.db");
        let op = delete_task("5");

        {
            let store = SqliteQueueStore::with_database(Database::open_at(&path).unwrap());
            store.insert(Partition::Tasks, &op).await.unwrap();
        }

        let store = SqliteQueueStore::with_database(Database::open_at(&path).unwrap());
        let listed = store.list(Partition::Tasks).await.unwrap();
        assert_eq!(listed, vec![op]);
    }
}
