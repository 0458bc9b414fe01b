//! `SQLite` database connection.
//!
//! The database is stored at `~/.studysync/queue.db` and holds the queue store
//! partitions, the synced-id ledger and dead letters.

use rusqlite::Connection;

use crate::config::Paths;
use crate::error::StudySyncError;

use super::migrations;

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at the default location.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open() -> Result<Self, StudySyncError> {
        let paths = Paths::new()?;
        paths.ensure_dirs()?;
        Self::open_at(&paths.database)
    }

    /// Open the database at a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_at(path: &std::path::Path) -> Result<Self, StudySyncError> {
        let conn = Connection::open(path).map_err(|e| {
            StudySyncError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;

        // `sync watch` and one-shot commands share this file.
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(|e| StudySyncError::Database(format!("Failed to configure database: {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StudySyncError::Database(format!("Failed to configure database: {e}")))?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, StudySyncError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StudySyncError::Database(format!("Failed to open in-memory database: {e}"))
        })?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StudySyncError::Database(format!("Failed to enable foreign keys: {e}")))?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    fn migrate(&self) -> Result<(), StudySyncError> {
        migrations::run(&self.conn)
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, StudySyncError> {
        migrations::get_version(&self.conn)
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.schema_version().unwrap() > 0);
    }

    #[test]
    fn test_open_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");

        let db = Database::open_at(&db_path).unwrap();
        assert!(db.schema_version().unwrap() > 0);
        assert!(db_path.exists());
    }

    #[test]
    fn test_reopen_database() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");

        {
            let db = Database::open_at(&db_path).unwrap();
            db.connection()
                .execute(
                    "INSERT INTO synced_operations (id, partition, synced_at) VALUES ('task-1-abc', 'tasks', 1)",
                    [],
                )
                .unwrap();
        }

        // Reopen - migrations must not wipe existing rows
        {
            let db = Database::open_at(&db_path).unwrap();
            let count: i64 = db
                .connection()
                .query_row("SELECT COUNT(*) FROM synced_operations", [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 1);
        }
    }
}
