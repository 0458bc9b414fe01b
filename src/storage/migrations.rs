//! Database migrations for studysync.
//!
//! Each migration upgrades the schema by one version and runs automatically
//! when the database is opened.

use rusqlite::Connection;

use crate::error::StudySyncError;

/// Current schema version.
const CURRENT_VERSION: i32 = 1;

/// Get the current schema version from the database.
///
/// Returns 0 for a new database.
pub fn get_version(conn: &Connection) -> Result<i32, StudySyncError> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| StudySyncError::Database(format!("Failed to get schema version: {e}")))?;

    Ok(version)
}

fn set_version(conn: &Connection, version: i32) -> Result<(), StudySyncError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| StudySyncError::Database(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), StudySyncError> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> Result<(), StudySyncError> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(StudySyncError::Database(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// - `pending_operations`: queued intents, one `partition` per entity kind
/// - `synced_operations`: ids removed after a successful replay
/// - `dead_letters`: operations the rejection policy took out of the queue
fn migrate_v1(conn: &Connection) -> Result<(), StudySyncError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS pending_operations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            partition TEXT NOT NULL,
            entity TEXT NOT NULL,
            op_type TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            payload TEXT,
            timestamp INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_pending_partition_user
        ON pending_operations(partition, user_id, timestamp);

        CREATE TABLE IF NOT EXISTS synced_operations (
            id TEXT PRIMARY KEY,
            partition TEXT NOT NULL,
            synced_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dead_letters (
            id TEXT PRIMARY KEY,
            partition TEXT NOT NULL,
            entity TEXT NOT NULL,
            op_type TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            payload TEXT,
            timestamp INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            last_error TEXT,
            failed_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_dead_letters_partition
        ON dead_letters(partition, user_id);
        ",
    )
    .map_err(|e| StudySyncError::Database(format!("Migration v1 failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_v1() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        conn.execute(
            "INSERT INTO pending_operations (id, partition, entity, op_type, endpoint, payload, timestamp, user_id)
             VALUES ('task-1-abc123', 'tasks', 'task', 'create', '/tasks', '{\"name\":\"X\"}', 1, 'alice')",
            [],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO dead_letters (id, partition, entity, op_type, endpoint, timestamp, user_id, attempts, failed_at)
             VALUES ('task-2-abc123', 'tasks', 'task', 'delete', '/tasks/9', 2, 'alice', 5, 3)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let insert = "INSERT INTO pending_operations (id, partition, entity, op_type, endpoint, timestamp, user_id)
                      VALUES ('task-1-dup', 'tasks', 'task', 'delete', '/tasks/1', 1, 'alice')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();
        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_get_version_new_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_version(&conn).unwrap(), 0);
    }
}
